use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Buf is an owned payload byte region with an explicit lock protocol.
/// Locking yields an exclusive slice plus a [`LockToken`]; the matching
/// token must be presented to unlock. A locked Buf may not be dropped:
/// doing so is a logic bug which trips an assertion in debug builds and
/// leaks the region in release builds, since freeing memory with an
/// outstanding borrow is worse than leaking it.
#[derive(Debug, Default)]
pub struct Buf {
    data: Vec<u8>,
    locked: Option<u64>,
}

/// LockToken witnesses one outstanding lock of one Buf.
#[derive(Debug)]
pub struct LockToken(u64);

impl Buf {
    /// An unlocked, zero-filled Buf of `len` bytes.
    pub fn alloc(len: usize) -> Self {
        Self {
            data: vec![0; len],
            locked: None,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, locked: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Shared read access. Reading does not require the lock; the lock
    /// protocol only guards mutation.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the exclusive lock, returning the witness token and the
    /// writable region.
    pub fn lock(&mut self) -> Result<(LockToken, &mut [u8])> {
        if self.locked.is_some() {
            return Err(Error::BufferLocked);
        }
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.locked = Some(token);
        Ok((LockToken(token), &mut self.data))
    }

    /// Release the lock taken by `lock`. The token must be the one that
    /// lock returned.
    pub fn unlock(&mut self, token: LockToken) -> Result<()> {
        match self.locked {
            None => Err(Error::BufferNotLocked),
            Some(held) if held != token.0 => Err(Error::WrongLockToken),
            Some(_) => {
                self.locked = None;
                Ok(())
            }
        }
    }

    pub(crate) fn deep_copy(&self) -> Buf {
        Buf::from_vec(self.data.clone())
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        if self.locked.is_some() {
            debug_assert!(false, "Buf dropped while locked");
            tracing::error!(len = self.data.len(), "Buf dropped while locked; leaking");
            std::mem::forget(std::mem::take(&mut self.data));
        }
    }
}
