use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The kinds of addon a manifest can declare and the registry can hold.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AddonKind {
    Extension,
    ExtensionGroup,
    Protocol,
    AddonLoader,
}

impl std::fmt::Display for AddonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddonKind::Extension => "extension",
            AddonKind::ExtensionGroup => "extension_group",
            AddonKind::Protocol => "protocol",
            AddonKind::AddonLoader => "addon_loader",
        };
        f.write_str(name)
    }
}

/// Manifest is the `manifest.json` identity document found in each addon
/// directory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(rename = "type")]
    pub kind: AddonKind,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Api::is_empty")]
    pub api: Api,
}

/// Api declares the messages an addon consumes and produces, by direction.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Api {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd_in: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd_out: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_in: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_out: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_frame_in: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_frame_out: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_frame_in: Vec<MsgDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_frame_out: Vec<MsgDecl>,
}

impl Api {
    pub fn is_empty(&self) -> bool {
        self.cmd_in.is_empty()
            && self.cmd_out.is_empty()
            && self.data_in.is_empty()
            && self.data_out.is_empty()
            && self.audio_frame_in.is_empty()
            && self.audio_frame_out.is_empty()
            && self.video_frame_in.is_empty()
            && self.video_frame_out.is_empty()
    }
}

/// One declared message: a name plus an optional property schema document,
/// handed to the schema seam during validation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MsgDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<serde_json::Value>,
}

/// PropertyDoc is the optional `property.json` defaults tree beside a
/// manifest. Free-form by design.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct PropertyDoc(pub serde_json::Value);

impl Manifest {
    pub fn from_str(text: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|err| Error::InvalidManifest(err.to_string()))?;

        if manifest.name.is_empty() {
            return Err(Error::InvalidManifest("manifest name is empty".to_string()));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manifest_parses() {
        let manifest = Manifest::from_str(
            r#"{
                "type": "extension",
                "name": "echo",
                "version": "0.1.0",
                "api": {
                    "cmd_in": [{"name": "hello"}],
                    "cmd_out": [{"name": "hello", "property": {"type": "object"}}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.kind, AddonKind::Extension);
        assert_eq!(manifest.name, "echo");
        assert_eq!(manifest.api.cmd_in[0].name, "hello");
    }

    #[test]
    fn test_manifest_rejections() {
        // Unknown field.
        assert!(Manifest::from_str(r#"{"type": "extension", "name": "x", "version": "1", "nope": 1}"#).is_err());
        // Unknown kind.
        assert!(Manifest::from_str(r#"{"type": "gizmo", "name": "x", "version": "1"}"#).is_err());
        // Empty name.
        assert!(Manifest::from_str(r#"{"type": "extension", "name": "", "version": "1"}"#).is_err());
    }
}
