//! The routing table resolves `(source extension, message kind, name)` to
//! the ordered destination list a graph's connections declare, with any
//! per-edge conversion attached. The table is built once when the engine
//! starts its graph and read on every routed message.

use message::{Location, MsgType};
use models::{Graph, MsgConversion, NodeType};
use std::collections::{HashMap, HashSet};

/// Message kinds which graph connections route. Results are never table
/// routed: they follow the path store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FlowKind {
    Cmd,
    Data,
    AudioFrame,
    VideoFrame,
}

impl FlowKind {
    pub fn of(msg_type: MsgType) -> Option<FlowKind> {
        match msg_type {
            MsgType::CmdResult => None,
            MsgType::Data => Some(FlowKind::Data),
            MsgType::AudioFrame => Some(FlowKind::AudioFrame),
            MsgType::VideoFrame => Some(FlowKind::VideoFrame),
            _ => Some(FlowKind::Cmd),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ResolvedDest {
    pub loc: Location,
    pub conversion: Option<MsgConversion>,
}

#[derive(Default)]
pub(crate) struct RoutingTable {
    edges: HashMap<(String, FlowKind, String), Vec<ResolvedDest>>,
    ext_group: HashMap<String, String>,
}

impl RoutingTable {
    /// Resolve a graph's connections into concrete Locations. Destinations
    /// which omit their extension_group inherit it from the node
    /// declaration; remote destinations keep whatever the graph said.
    pub fn build(graph: &Graph, graph_id: &str, own_uri: &str) -> Self {
        let mut table = RoutingTable::default();

        for node in &graph.nodes {
            if node.node_type == NodeType::Extension {
                table
                    .ext_group
                    .insert(node.name.clone(), node.extension_group.clone());
            }
        }

        for connection in &graph.connections {
            let flows = [
                (FlowKind::Cmd, &connection.cmd),
                (FlowKind::Data, &connection.data),
                (FlowKind::AudioFrame, &connection.audio_frame),
                (FlowKind::VideoFrame, &connection.video_frame),
            ];

            for (kind, flows) in flows {
                for flow in flows {
                    let dests = flow
                        .dest
                        .iter()
                        .map(|dest| {
                            let extension_group = if !dest.extension_group.is_empty() {
                                dest.extension_group.clone()
                            } else {
                                table
                                    .ext_group
                                    .get(&dest.extension)
                                    .cloned()
                                    .unwrap_or_default()
                            };
                            let app_uri = if dest.app == own_uri {
                                String::new() // Normalize "our own uri" to local.
                            } else {
                                dest.app.clone()
                            };

                            ResolvedDest {
                                loc: Location::new(
                                    app_uri,
                                    graph_id.to_string(),
                                    extension_group,
                                    dest.extension.clone(),
                                ),
                                conversion: dest.msg_conversion.clone(),
                            }
                        })
                        .collect();

                    table.edges.insert(
                        (connection.extension.clone(), kind, flow.name.clone()),
                        dests,
                    );
                }
            }
        }
        table
    }

    pub fn resolve(&self, extension: &str, kind: FlowKind, name: &str) -> Option<&[ResolvedDest]> {
        self.edges
            .get(&(extension.to_string(), kind, name.to_string()))
            .map(Vec::as_slice)
    }

    /// The group which hosts a local extension.
    pub fn group_of(&self, extension: &str) -> Option<&str> {
        self.ext_group.get(extension).map(String::as_str)
    }

    /// The outgoing command names wired for `extension`, handed to its Env
    /// for synchronous is_cmd_connected queries.
    pub fn connected_cmds(&self, extension: &str) -> HashSet<String> {
        self.edges
            .keys()
            .filter(|(source, kind, _)| source == extension && *kind == FlowKind::Cmd)
            .map(|(_, _, name)| name.clone())
            .collect()
    }
}
