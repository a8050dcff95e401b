use crate::{ErrorCode, MsgType, StatusCode};
use uuid::Uuid;
use value::Value;

/// CmdHeader is the correlation state shared by every command-like message
/// and by results: a globally unique cmd_id, and an optional caller-supplied
/// seq_id which survives the round trip untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdHeader {
    pub cmd_id: Uuid,
    pub seq_id: String,
}

impl CmdHeader {
    pub fn new() -> Self {
        Self {
            cmd_id: Uuid::new_v4(),
            seq_id: String::new(),
        }
    }
}

impl Default for CmdHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// CmdResultBody is the content of a CmdResult message.
#[derive(Debug, Clone)]
pub struct CmdResultBody {
    pub header: CmdHeader,
    pub status_code: StatusCode,
    /// Refinement of an Error status; absent when status is Ok.
    pub error_code: Option<ErrorCode>,
    /// Whether this is the last result for its cmd_id. Streaming commands
    /// may produce any number of non-final results first.
    pub is_final: bool,
    pub detail: Value,
    pub original_cmd_type: MsgType,
    pub original_cmd_name: String,
}

impl CmdResultBody {
    pub fn is_ok(&self) -> bool {
        self.status_code == StatusCode::Ok
    }
}

/// StartGraphBody carries the graph to instantiate: either inline JSON or
/// the name of a graph predefined in the app's configuration.
#[derive(Debug, Clone, Default)]
pub struct StartGraphBody {
    pub graph_json: String,
    pub predefined_graph_name: String,
    /// Run the engine on its own thread, detached from the app loop.
    pub long_running_mode: bool,
}

/// TimerBody starts (or, with `times == 0`, cancels) an engine timer.
/// Each firing is delivered to the requester as a Timeout command.
#[derive(Debug, Clone)]
pub struct TimerBody {
    pub timer_id: u64,
    pub timeout_us: u64,
    /// Number of firings; -1 repeats until cancelled, 0 cancels.
    pub times: i64,
}
