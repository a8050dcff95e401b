//! An inbound session. A freshly accepted connection is owned by the app
//! thread; once its first message reveals the target engine it is migrated
//! there in a single handoff, with any messages that raced the handoff
//! buffered and replayed in arrival order. No extension observes the
//! connection until migration completes.

use crate::app::AppState;
use crate::engine::EngineState;
use crate::protocol::{Protocol, ProtocolEvents};
use crate::runloop::Handle;
use message::SharedMessage;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The owned half of an inbound session: the protocol instance messages are
/// sent back through. Lives in the app's state before migration and in the
/// engine's after.
pub(crate) struct Connection {
    pub id: ConnectionId,
    pub protocol: Box<dyn Protocol>,
}

enum Target {
    /// Pre-migration: traffic goes to the app thread.
    App(Handle<AppState>),
    /// Migration underway: traffic buffers here until the engine owns the
    /// connection. The bool records a close racing the migration.
    Buffering(Vec<SharedMessage>, bool),
    /// Post-migration: traffic goes straight to the engine thread.
    Engine(Handle<EngineState>),
}

/// The events object handed to an accepted protocol instance. It decodes
/// inbound bytes and routes them to whichever thread owns the connection,
/// switching owners atomically under its lock.
pub(crate) struct ConnectionEvents {
    id: ConnectionId,
    target: Mutex<Target>,
}

impl ConnectionEvents {
    pub fn new(id: ConnectionId, app: Handle<AppState>) -> Self {
        Self {
            id,
            target: Mutex::new(Target::App(app)),
        }
    }

    /// Stop forwarding to the app; buffer until `attach_engine`.
    pub fn begin_migration(&self) {
        let mut target = self.target.lock().unwrap();
        *target = Target::Buffering(Vec::new(), false);
    }

    /// Hand delivery over to the engine, replaying anything buffered during
    /// the migration window, in order.
    pub fn attach_engine(&self, engine: Handle<EngineState>) {
        let mut target = self.target.lock().unwrap();

        if let Target::Buffering(buffered, closed) =
            std::mem::replace(&mut *target, Target::Engine(engine.clone()))
        {
            let id = self.id;
            for msg in buffered {
                engine.post(move |state: &mut EngineState| state.on_inbound(id, msg));
            }
            if closed {
                engine.post(move |state: &mut EngineState| state.connection_closed(id));
            }
        }
    }
}

impl ProtocolEvents for ConnectionEvents {
    fn on_message(&self, bytes: Vec<u8>) {
        let msg = match message::wire::decode(&bytes) {
            Ok(msg) => SharedMessage::new(msg),
            Err(err) => {
                tracing::warn!(id = %self.id, %err, "dropping undecodable inbound message");
                return;
            }
        };

        let id = self.id;
        match &mut *self.target.lock().unwrap() {
            Target::App(app) => app.post(move |state: &mut AppState| state.on_inbound(id, msg)),
            Target::Buffering(buffered, _) => buffered.push(msg),
            Target::Engine(engine) => {
                engine.post(move |state: &mut EngineState| state.on_inbound(id, msg))
            }
        }
    }

    fn on_closed(&self) {
        let id = self.id;
        match &mut *self.target.lock().unwrap() {
            Target::App(app) => {
                app.post(move |state: &mut AppState| state.connection_closed(id))
            }
            Target::Buffering(_, closed) => *closed = true,
            Target::Engine(engine) => {
                engine.post(move |state: &mut EngineState| state.connection_closed(id))
            }
        }
    }
}
