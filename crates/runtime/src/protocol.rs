//! The seam between the core and concrete wire protocols. A protocol addon
//! is registered under its URI scheme; the engine and app drive instances
//! only through these traits and never see transport specifics. Protocol
//! implementations run their own I/O loops and call back into the core
//! through [`ProtocolEvents`], which posts onto the owning runloop.

use crate::Result;
use std::sync::Arc;

/// The fixed role of one protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolRole {
    /// Accepts inbound sessions.
    Listen,
    /// An accepted inbound session.
    Communication,
    /// An outbound session dialed by a remote.
    Client,
}

/// Callbacks a protocol instance invokes from its own loop. `on_message`
/// hands over one complete serialized message; `on_closed` reports that the
/// instance is finished, whether by graceful close or transport failure —
/// the core takes the same path either way.
pub trait ProtocolEvents: Send + Sync {
    fn on_message(&self, bytes: Vec<u8>);
    fn on_closed(&self);
}

/// One live protocol instance.
pub trait Protocol: Send {
    fn role(&self) -> ProtocolRole;

    /// Queue one serialized message for transmission. The call never
    /// blocks; delivery is asynchronous.
    fn send(&mut self, bytes: Vec<u8>) -> Result<()>;

    /// Begin closing. Completion is reported through
    /// [`ProtocolEvents::on_closed`].
    fn close(&mut self);
}

/// A listening endpoint. Dropping or closing it stops accepting.
pub trait Listener: Send {
    fn close(&mut self);
}

/// Invoked by a listening protocol once per accepted session: the core
/// takes ownership of the session's Protocol and returns the events object
/// the session must deliver into.
pub type Acceptor = Arc<dyn Fn(Box<dyn Protocol>) -> Arc<dyn ProtocolEvents> + Send + Sync>;

/// Factory for protocol instances, registered under a URI scheme.
pub trait ProtocolAddon: Send + Sync {
    fn listen(&self, uri: &str, acceptor: Acceptor) -> Result<Box<dyn Listener>>;
    fn connect(&self, uri: &str, events: Arc<dyn ProtocolEvents>) -> Result<Box<dyn Protocol>>;
}
