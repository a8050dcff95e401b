use crate::conversion::MsgConversion;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A Graph declares the extension instances to run and the connections
/// along which their messages flow. It is the payload of the start-graph
/// command and of each predefined graph in the app configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Graph {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Extension,
    ExtensionGroup,
}

/// One extension (or extension group) instance to create.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Node {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Instance name, unique within its type and graph.
    pub name: String,
    /// Addon which manufactures the instance.
    pub addon: String,
    /// Group the extension joins. Ignored for extension_group nodes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_group: String,
    /// App hosting the node; empty means the app receiving the graph.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    /// Node-level property overrides, merged over the addon's defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<serde_json::Value>,
}

/// Connection declares the routed flows out of one source extension,
/// per message kind and name.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Connection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_group: String,
    pub extension: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<MessageFlow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<MessageFlow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_frame: Vec<MessageFlow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_frame: Vec<MessageFlow>,
}

/// MessageFlow routes messages of one name to an ordered destination list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MessageFlow {
    pub name: String,
    pub dest: Vec<Dest>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Dest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_group: String,
    pub extension: String,
    /// Property rewrite applied at this edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_conversion: Option<MsgConversion>,
}

impl Graph {
    pub fn from_json(doc: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(doc.clone())
            .map_err(|err| Error::InvalidGraph(err.to_string()))
    }

    pub fn from_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::InvalidGraph(err.to_string()))
    }

    /// Extension nodes of the graph.
    pub fn extensions(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.node_type == NodeType::Extension)
    }

    /// Structural validation: instance names are unique, every extension
    /// names a group, and local connection endpoints are declared nodes.
    /// Addon existence is the runtime's concern, not this model's.
    pub fn validate(&self) -> Result<()> {
        let mut extensions = BTreeSet::new();
        let mut groups = BTreeSet::new();

        for node in &self.nodes {
            if node.name.is_empty() || node.addon.is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "node '{}' must carry a name and an addon",
                    node.name
                )));
            }
            let named = match node.node_type {
                NodeType::Extension => {
                    if node.extension_group.is_empty() {
                        return Err(Error::InvalidGraph(format!(
                            "extension '{}' names no extension_group",
                            node.name
                        )));
                    }
                    extensions.insert((node.app.clone(), node.name.clone()))
                }
                NodeType::ExtensionGroup => {
                    groups.insert((node.app.clone(), node.name.clone()))
                }
            };
            if !named {
                return Err(Error::InvalidGraph(format!(
                    "duplicate node '{}'",
                    node.name
                )));
            }
        }

        for connection in &self.connections {
            // A remote source is validated by the app which owns it.
            if connection.app.is_empty()
                && !extensions.contains(&(String::new(), connection.extension.clone()))
            {
                return Err(Error::InvalidGraph(format!(
                    "connection source '{}' is not a declared extension",
                    connection.extension
                )));
            }

            for flow in connection.flows() {
                if flow.name.is_empty() {
                    return Err(Error::InvalidGraph(format!(
                        "a flow of '{}' has no message name",
                        connection.extension
                    )));
                }
                if flow.dest.is_empty() {
                    return Err(Error::InvalidGraph(format!(
                        "flow '{}' of '{}' has no destination",
                        flow.name, connection.extension
                    )));
                }
                for dest in &flow.dest {
                    if dest.app.is_empty()
                        && !extensions.contains(&(String::new(), dest.extension.clone()))
                    {
                        return Err(Error::InvalidGraph(format!(
                            "flow '{}' routes to undeclared extension '{}'",
                            flow.name, dest.extension
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Connection {
    /// All flows of the connection, across message kinds.
    pub fn flows(&self) -> impl Iterator<Item = &MessageFlow> {
        self.cmd
            .iter()
            .chain(&self.data)
            .chain(&self.audio_frame)
            .chain(&self.video_frame)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn echo_graph() -> serde_json::Value {
        json!({
            "nodes": [
                {"type": "extension", "name": "client", "addon": "client_addon",
                 "extension_group": "main"},
                {"type": "extension", "name": "server", "addon": "echo_addon",
                 "extension_group": "main"},
            ],
            "connections": [
                {"extension": "client",
                 "cmd": [{"name": "hello", "dest": [{"extension": "server"}]}]},
            ],
        })
    }

    #[test]
    fn test_graph_parses_and_validates() {
        let graph = Graph::from_json(&echo_graph()).unwrap();
        graph.validate().unwrap();

        assert_eq!(graph.extensions().count(), 2);
        assert_eq!(graph.connections[0].cmd[0].dest[0].extension, "server");

        // And round-trips.
        let doc = serde_json::to_value(&graph).unwrap();
        assert_eq!(Graph::from_json(&doc).unwrap(), graph);
    }

    #[test]
    fn test_validation_failures() {
        // Unknown connection source.
        let mut doc = echo_graph();
        doc["connections"][0]["extension"] = json!("phantom");
        assert!(Graph::from_json(&doc).unwrap().validate().is_err());

        // Unknown destination.
        let mut doc = echo_graph();
        doc["connections"][0]["cmd"][0]["dest"][0]["extension"] = json!("phantom");
        assert!(Graph::from_json(&doc).unwrap().validate().is_err());

        // Duplicate node name.
        let mut doc = echo_graph();
        doc["nodes"][1]["name"] = json!("client");
        assert!(Graph::from_json(&doc).unwrap().validate().is_err());

        // Extension without a group.
        let mut doc = echo_graph();
        doc["nodes"][0].as_object_mut().unwrap().remove("extension_group");
        assert!(Graph::from_json(&doc).unwrap().validate().is_err());

        // Unknown top-level key is a parse error outright.
        let mut doc = echo_graph();
        doc["surprise"] = json!(true);
        assert!(Graph::from_json(&doc).is_err());

        // A remote destination needs no local declaration.
        let mut doc = echo_graph();
        doc["connections"][0]["cmd"][0]["dest"][0] =
            json!({"app": "msgpack://10.0.0.2:8001/", "extension": "far"});
        Graph::from_json(&doc).unwrap().validate().unwrap();
    }
}
