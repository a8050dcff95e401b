//! The outbound side to one remote app URI. An engine holds at most one
//! Remote per URI; a miss constructs one lazily through the protocol addon
//! registered for the URI's scheme.

use crate::engine::EngineState;
use crate::protocol::{Protocol, ProtocolEvents};
use crate::runloop::Handle;
use crate::{Error, Result};
use message::SharedMessage;
use std::sync::Arc;

pub(crate) struct Remote {
    pub protocol: Box<dyn Protocol>,
}

impl Remote {
    /// Dial `uri` through the protocol addon registered for its scheme.
    /// Inbound traffic and the close notification post onto the engine.
    pub fn connect(uri: &str, engine: Handle<EngineState>) -> Result<Remote> {
        let parsed = url::Url::parse(uri)
            .map_err(|err| Error::protocol(format!("remote uri '{uri}': {err}")))?;
        let addon = crate::addon::registry().protocol_addon(parsed.scheme())?;

        let events = Arc::new(RemoteEvents {
            uri: uri.to_string(),
            engine,
        });
        let protocol = addon.connect(uri, events)?;
        Ok(Remote { protocol })
    }

    pub fn send(&mut self, msg: &SharedMessage) -> Result<()> {
        let bytes = message::wire::encode(msg.get())?;
        self.protocol.send(bytes)
    }
}

struct RemoteEvents {
    uri: String,
    engine: Handle<EngineState>,
}

impl ProtocolEvents for RemoteEvents {
    fn on_message(&self, bytes: Vec<u8>) {
        let msg = match message::wire::decode(&bytes) {
            Ok(msg) => SharedMessage::new(msg),
            Err(err) => {
                tracing::warn!(uri = %self.uri, %err, "dropping undecodable remote message");
                return;
            }
        };
        let uri = self.uri.clone();
        self.engine
            .post(move |state: &mut EngineState| state.on_remote_inbound(&uri, msg));
    }

    fn on_closed(&self) {
        let uri = self.uri.clone();
        self.engine
            .post(move |state: &mut EngineState| state.remote_closed(&uri));
    }
}
