use value::{Path, Value};

pub mod buf;
pub mod cmd;
pub mod frame;
mod loc;
mod shared;
mod status;
pub mod wire;

pub use buf::{Buf, LockToken};
pub use cmd::{CmdHeader, CmdResultBody, StartGraphBody, TimerBody};
pub use frame::{AudioFrameBody, AudioFrameDataFmt, DataBody, PixelFmt, VideoFrameBody};
pub use loc::{Location, LOCALHOST};
pub use shared::{FieldMask, SharedMessage};
pub use status::{ErrorCode, StatusCode};

/// Names of the built-in commands. The prefix is reserved: user-defined
/// message names may never carry it, so built-ins can't be spoofed.
pub const RESERVED_NAME_PREFIX: &str = "weft:";
pub const CMD_START_GRAPH: &str = "weft:start_graph";
pub const CMD_STOP_GRAPH: &str = "weft:stop_graph";
pub const CMD_CLOSE_APP: &str = "weft:close_app";
pub const CMD_TIMER: &str = "weft:timer";
pub const CMD_TIMEOUT: &str = "weft:timeout";
pub const CMD_RESULT: &str = "weft:result";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("message is shared and cannot be mutated")]
    MessageInUse,
    #[error("buffer is already locked")]
    BufferLocked,
    #[error("buffer is not locked")]
    BufferNotLocked,
    #[error("lock token does not match this buffer")]
    WrongLockToken,
    #[error("invalid message name '{0}'")]
    InvalidName(String),
    #[error("message of type {0} has no {1}")]
    NoSuchField(MsgType, &'static str),
    #[error("invalid wire encoding: {0}")]
    InvalidWire(&'static str),
    #[error(transparent)]
    Value(#[from] value::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// MsgType tags the message variants which flow through a graph: the five
/// user-visible kinds, plus the built-in commands the runtime itself sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Cmd,
    CmdResult,
    Data,
    AudioFrame,
    VideoFrame,
    StartGraph,
    StopGraph,
    CloseApp,
    Timer,
    Timeout,
}

impl MsgType {
    /// Command-like messages are correlatable: they carry a cmd_id and
    /// expect a final CmdResult.
    pub fn is_cmd_like(&self) -> bool {
        !matches!(
            self,
            MsgType::CmdResult | MsgType::Data | MsgType::AudioFrame | MsgType::VideoFrame
        )
    }

    /// Whether the type is internal to the runtime rather than user-defined.
    pub fn is_builtin(&self) -> bool {
        matches!(
            self,
            MsgType::StartGraph
                | MsgType::StopGraph
                | MsgType::CloseApp
                | MsgType::Timer
                | MsgType::Timeout
        )
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::Cmd => "cmd",
            MsgType::CmdResult => "cmd_result",
            MsgType::Data => "data",
            MsgType::AudioFrame => "audio_frame",
            MsgType::VideoFrame => "video_frame",
            MsgType::StartGraph => "start_graph",
            MsgType::StopGraph => "stop_graph",
            MsgType::CloseApp => "close_app",
            MsgType::Timer => "timer",
            MsgType::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Body holds the variant-specific content of a Message.
#[derive(Debug)]
pub enum Body {
    Cmd(CmdHeader),
    CmdResult(CmdResultBody),
    Data(DataBody),
    AudioFrame(AudioFrameBody),
    VideoFrame(VideoFrameBody),
    StartGraph(CmdHeader, StartGraphBody),
    StopGraph(CmdHeader, String),
    CloseApp(CmdHeader),
    Timer(CmdHeader, TimerBody),
    Timeout(CmdHeader, u64),
}

/// Message is one unit of graph traffic: a name, a source, one or more
/// destinations, a property tree, and variant-specific content. A Message is
/// freely mutable while exclusively owned; once wrapped in a
/// [`SharedMessage`] and cloned, it is frozen in transit.
#[derive(Debug)]
pub struct Message {
    name: String,
    src: Location,
    dests: Vec<Location>,
    properties: Value,
    body: Body,
}

impl Message {
    fn new(name: String, body: Body) -> Self {
        Self {
            name,
            src: Location::default(),
            dests: Vec::new(),
            properties: Value::object(),
            body,
        }
    }

    fn check_user_name(name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with(RESERVED_NAME_PREFIX) {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// A user-defined command.
    pub fn cmd(name: &str) -> Result<Self> {
        Self::check_user_name(name)?;
        Ok(Self::new(name.to_string(), Body::Cmd(CmdHeader::new())))
    }

    /// A result answering `original`, which must be command-like. The result
    /// inherits the command's cmd_id and seq_id, records the original type
    /// and name, and is addressed back at the command's source.
    pub fn cmd_result(status: StatusCode, original: &Message) -> Result<Self> {
        let header = match original.cmd_header() {
            Some(header) => header.clone(),
            None => return Err(Error::NoSuchField(original.msg_type(), "cmd_id")),
        };

        let mut result = Self::new(
            CMD_RESULT.to_string(),
            Body::CmdResult(CmdResultBody {
                header,
                status_code: status,
                error_code: None,
                is_final: true,
                detail: Value::Null,
                original_cmd_type: original.msg_type(),
                original_cmd_name: original.name.clone(),
            }),
        );
        result.dests.push(original.src.clone());
        Ok(result)
    }

    /// A result assembled from recorded correlation state rather than the
    /// original command, for synthesized results (timeouts, close flushes)
    /// where the command itself is long gone.
    pub fn cmd_result_from_parts(
        status: StatusCode,
        cmd_id: uuid::Uuid,
        original_cmd_type: MsgType,
        original_cmd_name: &str,
    ) -> Self {
        Self::new(
            CMD_RESULT.to_string(),
            Body::CmdResult(CmdResultBody {
                header: CmdHeader {
                    cmd_id,
                    seq_id: String::new(),
                },
                status_code: status,
                error_code: None,
                is_final: true,
                detail: Value::Null,
                original_cmd_type,
                original_cmd_name: original_cmd_name.to_string(),
            }),
        )
    }

    /// A data frame.
    pub fn data(name: &str) -> Result<Self> {
        Self::check_user_name(name)?;
        Ok(Self::new(
            name.to_string(),
            Body::Data(DataBody::default()),
        ))
    }

    /// An audio frame.
    pub fn audio_frame(name: &str) -> Result<Self> {
        Self::check_user_name(name)?;
        Ok(Self::new(
            name.to_string(),
            Body::AudioFrame(AudioFrameBody::default()),
        ))
    }

    /// A video frame.
    pub fn video_frame(name: &str) -> Result<Self> {
        Self::check_user_name(name)?;
        Ok(Self::new(
            name.to_string(),
            Body::VideoFrame(VideoFrameBody::default()),
        ))
    }

    pub fn start_graph(body: StartGraphBody) -> Self {
        Self::new(
            CMD_START_GRAPH.to_string(),
            Body::StartGraph(CmdHeader::new(), body),
        )
    }

    pub fn stop_graph(graph_id: impl Into<String>) -> Self {
        Self::new(
            CMD_STOP_GRAPH.to_string(),
            Body::StopGraph(CmdHeader::new(), graph_id.into()),
        )
    }

    pub fn close_app() -> Self {
        Self::new(CMD_CLOSE_APP.to_string(), Body::CloseApp(CmdHeader::new()))
    }

    pub fn timer(timer: TimerBody) -> Self {
        Self::new(CMD_TIMER.to_string(), Body::Timer(CmdHeader::new(), timer))
    }

    pub fn timeout(timer_id: u64) -> Self {
        Self::new(
            CMD_TIMEOUT.to_string(),
            Body::Timeout(CmdHeader::new(), timer_id),
        )
    }

    // Accessors.

    pub fn msg_type(&self) -> MsgType {
        match &self.body {
            Body::Cmd(_) => MsgType::Cmd,
            Body::CmdResult(_) => MsgType::CmdResult,
            Body::Data(_) => MsgType::Data,
            Body::AudioFrame(_) => MsgType::AudioFrame,
            Body::VideoFrame(_) => MsgType::VideoFrame,
            Body::StartGraph(..) => MsgType::StartGraph,
            Body::StopGraph(..) => MsgType::StopGraph,
            Body::CloseApp(_) => MsgType::CloseApp,
            Body::Timer(..) => MsgType::Timer,
            Body::Timeout(..) => MsgType::Timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn src(&self) -> &Location {
        &self.src
    }

    pub fn dests(&self) -> &[Location] {
        &self.dests
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn properties(&self) -> &Value {
        &self.properties
    }

    /// The correlation header, present on command-like messages and results.
    pub fn cmd_header(&self) -> Option<&CmdHeader> {
        match &self.body {
            Body::Cmd(header)
            | Body::CloseApp(header)
            | Body::StartGraph(header, _)
            | Body::StopGraph(header, _)
            | Body::Timer(header, _)
            | Body::Timeout(header, _) => Some(header),
            Body::CmdResult(result) => Some(&result.header),
            _ => None,
        }
    }

    fn cmd_header_mut(&mut self) -> Option<&mut CmdHeader> {
        match &mut self.body {
            Body::Cmd(header)
            | Body::CloseApp(header)
            | Body::StartGraph(header, _)
            | Body::StopGraph(header, _)
            | Body::Timer(header, _)
            | Body::Timeout(header, _) => Some(header),
            Body::CmdResult(result) => Some(&mut result.header),
            _ => None,
        }
    }

    pub fn cmd_id(&self) -> Option<uuid::Uuid> {
        self.cmd_header().map(|header| header.cmd_id)
    }

    /// The caller-supplied sequence id, carried untouched through the
    /// command's round trip.
    pub fn seq_id(&self) -> Option<&str> {
        self.cmd_header().map(|header| header.seq_id.as_str())
    }

    pub fn set_seq_id(&mut self, seq_id: &str) -> Result<()> {
        match self.cmd_header_mut() {
            Some(header) => {
                header.seq_id = seq_id.to_string();
                Ok(())
            }
            None => Err(Error::NoSuchField(self.msg_type(), "seq_id")),
        }
    }

    fn payload_buf(&mut self) -> Result<&mut Buf> {
        let msg_type = self.msg_type();
        match &mut self.body {
            Body::Data(body) => Ok(&mut body.buf),
            Body::AudioFrame(body) => Ok(&mut body.buf),
            Body::VideoFrame(body) => Ok(&mut body.buf),
            _ => Err(Error::NoSuchField(msg_type, "payload buffer")),
        }
    }

    /// Replace a frame's payload with a fresh zero-filled buffer.
    pub fn alloc_buf(&mut self, len: usize) -> Result<()> {
        *self.payload_buf()? = Buf::alloc(len);
        Ok(())
    }

    /// Lock a frame's payload buffer for writing. See [`Buf::lock`].
    pub fn lock_buf(&mut self) -> Result<(LockToken, &mut [u8])> {
        self.payload_buf()?.lock()
    }

    /// Release the payload lock taken by [`Message::lock_buf`].
    pub fn unlock_buf(&mut self, token: LockToken) -> Result<()> {
        self.payload_buf()?.unlock(token)
    }

    /// The result body, if this is a CmdResult.
    pub fn result(&self) -> Option<&CmdResultBody> {
        match &self.body {
            Body::CmdResult(result) => Some(result),
            _ => None,
        }
    }

    pub fn result_mut(&mut self) -> Option<&mut CmdResultBody> {
        match &mut self.body {
            Body::CmdResult(result) => Some(result),
            _ => None,
        }
    }

    // Mutators. These take &mut self: a Message inside a SharedMessage is
    // reached through SharedMessage::get_mut, which enforces exclusivity.

    pub fn set_src(&mut self, src: Location) {
        self.src = src;
    }

    pub fn clear_dests(&mut self) {
        self.dests.clear();
    }

    pub fn add_dest(&mut self, dest: Location) {
        self.dests.push(dest);
    }

    pub fn set_property(&mut self, path: &str, value: Value) -> Result<()> {
        let path: Path = path.parse().map_err(value::Error::from)?;
        self.properties.set(&path, value)?;
        Ok(())
    }

    pub fn peek_property(&self, path: &str) -> Option<&Value> {
        let path: Path = path.parse().ok()?;
        path.query(&self.properties)
    }

    /// Replace the whole property tree. `properties` must be an Object.
    pub fn set_properties(&mut self, properties: Value) -> Result<()> {
        properties.as_object().map_err(Error::Value)?;
        self.properties = properties;
        Ok(())
    }

    /// Make an exclusively owned copy. Correlatable copies are re-keyed with
    /// a fresh cmd_id: a deep copy is a new conversation, not a resend.
    pub fn deep_copy(&self, exclude: FieldMask) -> Self {
        let mut copy = Self {
            name: self.name.clone(),
            src: self.src.clone(),
            dests: if exclude.dests {
                Vec::new()
            } else {
                self.dests.clone()
            },
            properties: if exclude.properties {
                Value::object()
            } else {
                self.properties.clone()
            },
            body: self.body.deep_copy(),
        };
        // Results keep their cmd_id on copy: the id is how they find their
        // way home. Everything else correlatable is re-keyed.
        if copy.msg_type() != MsgType::CmdResult {
            if let Some(header) = copy.cmd_header_mut() {
                header.cmd_id = uuid::Uuid::new_v4();
            }
        }
        copy
    }

    /// An exclusively owned copy for forwarding across a hop: identical
    /// fields including cmd_id, since the copy continues the same
    /// conversation rather than opening a new one.
    pub fn forward_copy(&self) -> Self {
        let original = self.cmd_id();
        let mut copy = self.deep_copy(FieldMask::default());
        if let (Some(header), Some(cmd_id)) = (copy.cmd_header_mut(), original) {
            header.cmd_id = cmd_id;
        }
        copy
    }
}

impl Body {
    fn deep_copy(&self) -> Body {
        match self {
            Body::Cmd(header) => Body::Cmd(header.clone()),
            Body::CmdResult(result) => Body::CmdResult(result.clone()),
            Body::Data(data) => Body::Data(data.deep_copy()),
            Body::AudioFrame(frame) => Body::AudioFrame(frame.deep_copy()),
            Body::VideoFrame(frame) => Body::VideoFrame(frame.deep_copy()),
            Body::StartGraph(header, body) => Body::StartGraph(header.clone(), body.clone()),
            Body::StopGraph(header, graph_id) => {
                Body::StopGraph(header.clone(), graph_id.clone())
            }
            Body::CloseApp(header) => Body::CloseApp(header.clone()),
            Body::Timer(header, timer) => Body::Timer(header.clone(), timer.clone()),
            Body::Timeout(header, timer_id) => Body::Timeout(header.clone(), *timer_id),
        }
    }
}
