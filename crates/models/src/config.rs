use crate::Graph;
use serde::{Deserialize, Serialize};

/// AppConfig is the app-level property document: the app's own URI, the
/// path-store knobs, logging, and any predefined graphs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// URI under which remote apps address this one. Empty means the app
    /// is purely local and listens on nothing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,

    /// Expiry applied to a dispatched command which sets none of its own,
    /// in microseconds.
    #[serde(default = "AppConfig::default_path_timeout_us")]
    pub path_timeout: u64,
    /// Cadence of the path-store expiry sweep, in microseconds.
    #[serde(default = "AppConfig::default_path_check_interval_us")]
    pub path_check_interval: u64,

    /// Keep the process alive while no engine is running.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub long_running_mode: bool,
    /// Give each engine a dedicated event-loop thread.
    #[serde(default = "default_true")]
    pub one_event_loop_per_engine: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predefined_graphs: Vec<PredefinedGraph>,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("empty config parses")
    }
}

impl AppConfig {
    // 30 seconds, overridable per app and per path.
    fn default_path_timeout_us() -> u64 {
        30_000_000
    }

    // One sweep per second.
    fn default_path_check_interval_us() -> u64 {
        1_000_000
    }

    pub fn predefined_graph(&self, name: &str) -> Option<&PredefinedGraph> {
        self.predefined_graphs.iter().find(|graph| graph.name == name)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A graph declared in the app configuration, startable by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PredefinedGraph {
    pub name: String,
    /// Start the graph when the app starts, without a start-graph command.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_start: bool,
    /// At most one engine of this graph may run at a time.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub singleton: bool,
    pub graph: Graph,
}
