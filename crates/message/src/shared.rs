use crate::{Error, Message, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// SharedMessage is the reference-counted handle under which a Message
/// travels the graph. Cloning bumps the count; the Message is destroyed
/// exactly once, when the last handle drops.
///
/// The first clone freezes the Message permanently: a frozen Message can be
/// read through any handle but mutated through none, even if the count later
/// returns to one. This is what makes it safe to hand the same Message to
/// several mailboxes without copying it — whoever wants to change it takes a
/// [`Message::deep_copy`] instead.
#[derive(Debug)]
pub struct SharedMessage(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    frozen: AtomicBool,
    message: Message,
}

/// FieldMask selects Message fields for [`Message::deep_copy`] to reset
/// rather than copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMask {
    pub properties: bool,
    pub dests: bool,
}

impl SharedMessage {
    pub fn new(message: Message) -> Self {
        Self(Arc::new(Inner {
            frozen: AtomicBool::new(false),
            message,
        }))
    }

    pub fn get(&self) -> &Message {
        &self.0.message
    }

    /// Exclusive access to the Message. Fails with MessageInUse once the
    /// Message is frozen or while any other handle exists.
    pub fn get_mut(&mut self) -> Result<&mut Message> {
        if self.0.frozen.load(Ordering::Acquire) {
            return Err(Error::MessageInUse);
        }
        match Arc::get_mut(&mut self.0) {
            Some(inner) => Ok(&mut inner.message),
            None => Err(Error::MessageInUse),
        }
    }

    /// The number of live handles to this Message.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::Acquire)
    }

    /// A fresh, unfrozen, exclusively owned copy (see [`Message::deep_copy`]).
    pub fn deep_copy(&self, exclude: FieldMask) -> SharedMessage {
        SharedMessage::new(self.0.message.deep_copy(exclude))
    }
}

impl Clone for SharedMessage {
    fn clone(&self) -> Self {
        self.0.frozen.store(true, Ordering::Release);
        Self(self.0.clone())
    }
}

impl From<Message> for SharedMessage {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
