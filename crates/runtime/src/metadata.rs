//! Locating addon metadata on disk. Each addon directory carries a
//! `manifest.json` identity document and optionally a `property.json`
//! defaults tree; they are found by walking parent directories upward from
//! wherever the addon's module was loaded, until a manifest matching the
//! wanted type and name appears.

use crate::{Error, ErrorCode, Result};
use models::{AddonKind, Manifest, PropertyDoc};
use std::path::{Path, PathBuf};

pub const MANIFEST_JSON: &str = "manifest.json";
pub const PROPERTY_JSON: &str = "property.json";

#[derive(Debug, Clone)]
pub struct AddonMetadata {
    pub dir: PathBuf,
    pub manifest: Manifest,
    pub property: Option<PropertyDoc>,
}

/// The app's base directory: the [`crate::app::ENV_APP_BASE_DIR`]
/// environment override when set, `fallback` otherwise.
pub fn app_base_dir(fallback: &Path) -> PathBuf {
    match std::env::var(crate::app::ENV_APP_BASE_DIR) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => fallback.to_path_buf(),
    }
}

/// Find the metadata of addon `(kind, name)`, starting at `start_dir` and
/// walking parents until a matching manifest is found.
pub fn find_addon_metadata(
    start_dir: &Path,
    kind: AddonKind,
    name: &str,
) -> Result<AddonMetadata> {
    let mut dir = Some(start_dir);

    while let Some(current) = dir {
        if let Some(manifest) = load_manifest(current)? {
            if manifest.kind == kind && manifest.name == name {
                return Ok(AddonMetadata {
                    dir: current.to_path_buf(),
                    property: load_property(current)?,
                    manifest,
                });
            }
        }
        dir = current.parent();
    }

    Err(Error::new(
        ErrorCode::InvalidManifest,
        format!("no manifest for {kind} '{name}' at or above {}", start_dir.display()),
    ))
}

/// Parse the manifest in `dir`, if one exists there.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_JSON);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|err| {
        Error::new(
            ErrorCode::InvalidManifest,
            format!("reading {}: {err}", path.display()),
        )
    })?;
    Ok(Some(Manifest::from_str(&text)?))
}

fn load_property(dir: &Path) -> Result<Option<PropertyDoc>> {
    let path = dir.join(PROPERTY_JSON);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|err| {
        Error::new(
            ErrorCode::InvalidManifest,
            format!("reading {}: {err}", path.display()),
        )
    })?;
    let doc = serde_json::from_str(&text).map_err(|err| {
        Error::new(
            ErrorCode::InvalidManifest,
            format!("{}: {err}", path.display()),
        )
    })?;
    Ok(Some(PropertyDoc(doc)))
}
