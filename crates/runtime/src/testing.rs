//! Test support: an in-process "loopback" protocol which connects apps
//! within one process by URI, with the same accept/connect/close surface a
//! real transport has. Registered under the `loop` scheme.

use crate::protocol::{
    Acceptor, Listener, Protocol, ProtocolAddon, ProtocolEvents, ProtocolRole,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

lazy_static::lazy_static! {
    // The process-wide "network": listening URIs and their acceptors.
    static ref NETWORK: Mutex<HashMap<String, Acceptor>> = Mutex::new(HashMap::new());
}

/// Register the loopback protocol under the `loop` URI scheme.
pub fn register_loopback() {
    crate::addon::register_addon_as_protocol("loop", LoopbackAddon);
}

pub struct LoopbackAddon;

impl ProtocolAddon for LoopbackAddon {
    fn listen(&self, uri: &str, acceptor: Acceptor) -> Result<Box<dyn Listener>> {
        let mut network = NETWORK.lock().unwrap();
        if network.contains_key(uri) {
            return Err(Error::protocol(format!("'{uri}' is already listening")));
        }
        network.insert(uri.to_string(), acceptor);

        Ok(Box::new(LoopbackListener {
            uri: uri.to_string(),
        }))
    }

    fn connect(&self, uri: &str, events: Arc<dyn ProtocolEvents>) -> Result<Box<dyn Protocol>> {
        let acceptor = NETWORK
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::protocol(format!("nothing is listening at '{uri}'")))?;

        let shared = Arc::new(Shared {
            client_events: events,
            server_events: OnceLock::new(),
            closed: AtomicBool::new(false),
        });

        let server_events = acceptor(Box::new(End {
            shared: shared.clone(),
            is_client: false,
        }));
        shared
            .server_events
            .set(server_events)
            .unwrap_or_else(|_| unreachable!("server events are set once"));

        Ok(Box::new(End {
            shared,
            is_client: true,
        }))
    }
}

struct LoopbackListener {
    uri: String,
}

impl Listener for LoopbackListener {
    fn close(&mut self) {
        NETWORK.lock().unwrap().remove(&self.uri);
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.close();
    }
}

// The state shared by both ends of one loopback session.
struct Shared {
    client_events: Arc<dyn ProtocolEvents>,
    server_events: OnceLock<Arc<dyn ProtocolEvents>>,
    closed: AtomicBool,
}

struct End {
    shared: Arc<Shared>,
    is_client: bool,
}

impl Protocol for End {
    fn role(&self) -> ProtocolRole {
        if self.is_client {
            ProtocolRole::Client
        } else {
            ProtocolRole::Communication
        }
    }

    fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::protocol("loopback session is closed"));
        }
        if self.is_client {
            match self.shared.server_events.get() {
                Some(peer) => peer.on_message(bytes),
                None => return Err(Error::protocol("loopback peer is not wired yet")),
            }
        } else {
            self.shared.client_events.on_message(bytes);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return; // Already closed by either end.
        }
        self.shared.client_events.on_closed();
        if let Some(peer) = self.shared.server_events.get() {
            peer.on_closed();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        messages: StdMutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
    }

    impl ProtocolEvents for Recorder {
        fn on_message(&self, bytes: Vec<u8>) {
            self.messages.lock().unwrap().push(bytes);
        }
        fn on_closed(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[test]
    fn test_connect_send_close() {
        let accepted: Arc<StdMutex<Vec<(Box<dyn Protocol>, Arc<Recorder>)>>> =
            Arc::new(StdMutex::new(Vec::new()));

        let acceptor: Acceptor = {
            let accepted = accepted.clone();
            Arc::new(move |protocol| {
                let events = Arc::new(Recorder::default());
                accepted.lock().unwrap().push((protocol, events.clone()));
                events
            })
        };

        let uri = "loop://test-connect/";
        let mut listener = LoopbackAddon.listen(uri, acceptor).unwrap();

        let client_events = Arc::new(Recorder::default());
        let mut client = LoopbackAddon.connect(uri, client_events.clone()).unwrap();
        assert_eq!(client.role(), ProtocolRole::Client);

        // Client to server.
        client.send(b"ping".to_vec()).unwrap();
        let mut accepted = accepted.lock().unwrap();
        let (server, server_events) = accepted.last_mut().unwrap();
        assert_eq!(server_events.messages.lock().unwrap().as_slice(), [b"ping"]);

        // Server to client.
        server.send(b"pong".to_vec()).unwrap();
        assert_eq!(client_events.messages.lock().unwrap().as_slice(), [b"pong"]);

        // Close notifies both ends once; later sends fail.
        client.close();
        assert!(client_events.closed.load(Ordering::Acquire));
        assert!(server_events.closed.load(Ordering::Acquire));
        assert!(server.send(b"late".to_vec()).is_err());

        listener.close();
        assert!(LoopbackAddon
            .connect(uri, Arc::new(Recorder::default()))
            .is_err());
    }
}
