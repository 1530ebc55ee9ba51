use crate::browser::SessionHandle;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

/// Health of a browser session, reported at release time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    /// The session is fine and may be reused
    Healthy,

    /// The session's page state is unknown or suspect; it must not be
    /// reused
    Degraded,

    /// The underlying context crashed or is gone
    Dead,
}

/// An exclusively owned browser session checked out of the pool
///
/// At most one in-flight navigation owns a session at a time; the owning
/// worker returns it with [`SessionPool::release`](crate::pool::SessionPool::release)
/// when done. The embedded permit keeps the pool's session bound honest:
/// capacity is only freed once the session is released or dropped.
#[derive(Debug)]
pub struct BrowserSession {
    handle: SessionHandle,
    created_at: Instant,
    last_used: Instant,
    uses: u32,
    _permit: OwnedSemaphorePermit,
}

impl BrowserSession {
    pub(super) fn new(
        handle: SessionHandle,
        created_at: Instant,
        uses: u32,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            handle,
            created_at,
            last_used: Instant::now(),
            uses,
            _permit: permit,
        }
    }

    /// The capability handle for this session's browsing context
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Session identifier (stable for the life of the context)
    pub fn id(&self) -> u64 {
        self.handle.0
    }

    /// When the underlying context was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When this session last performed a navigation
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Completed checkouts of this context before the current one
    pub fn uses(&self) -> u32 {
        self.uses
    }

    /// Records a navigation on this session
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(super) fn into_parts(self) -> (SessionHandle, Instant, u32) {
        (self.handle, self.created_at, self.uses)
    }
}
