use serde::{Deserialize, Serialize};

/// The app URI which always means "this app", alongside the empty string.
pub const LOCALHOST: &str = "localhost";

/// Location addresses one extension instance in a running graph:
/// `(app URI, graph id, extension group, extension)`. An empty field means
/// "the current one", which lets a message address a peer without knowing
/// where it itself is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "app", default, skip_serializing_if = "String::is_empty")]
    pub app_uri: String,
    #[serde(rename = "graph", default, skip_serializing_if = "String::is_empty")]
    pub graph_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension: String,
}

impl Location {
    pub fn new(
        app_uri: impl Into<String>,
        graph_id: impl Into<String>,
        extension_group: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            app_uri: app_uri.into(),
            graph_id: graph_id.into(),
            extension_group: extension_group.into(),
            extension: extension.into(),
        }
    }

    /// A Location naming only an extension within the current app and graph.
    pub fn extension(extension_group: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::new("", "", extension_group, extension)
    }

    pub fn is_empty(&self) -> bool {
        self.app_uri.is_empty()
            && self.graph_id.is_empty()
            && self.extension_group.is_empty()
            && self.extension.is_empty()
    }

    /// Whether this Location addresses the app whose URI is `own_uri`.
    /// The empty URI and "localhost" both mean "this app".
    pub fn is_local_to(&self, own_uri: &str) -> bool {
        self.app_uri.is_empty() || self.app_uri == LOCALHOST || self.app_uri == own_uri
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.app_uri, self.graph_id, self.extension_group, self.extension
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_locality() {
        let loc = Location::extension("group", "ext");
        assert!(loc.is_local_to("msgpack://10.0.0.1:8001/"));

        let loc = Location::new(LOCALHOST, "", "group", "ext");
        assert!(loc.is_local_to("msgpack://10.0.0.1:8001/"));

        let loc = Location::new("msgpack://10.0.0.2:8001/", "", "group", "ext");
        assert!(!loc.is_local_to("msgpack://10.0.0.1:8001/"));
        assert!(loc.is_local_to("msgpack://10.0.0.2:8001/"));
    }

    #[test]
    fn test_serde_field_names() {
        let loc = Location::new("msgpack://h:1/", "g1", "grp", "ext");
        let doc = serde_json::to_value(&loc).unwrap();
        assert_eq!(
            doc,
            serde_json::json!({
                "app": "msgpack://h:1/",
                "graph": "g1",
                "extension_group": "grp",
                "extension": "ext",
            })
        );

        // Omitted fields deserialize as "current".
        let loc: Location = serde_json::from_value(serde_json::json!({
            "extension": "ext",
        }))
        .unwrap();
        assert_eq!(loc, Location::new("", "", "", "ext"));
    }
}
