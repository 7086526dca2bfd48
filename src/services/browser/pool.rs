// src/services/browser/pool.rs

//! Bounded session pool with scoped release.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{BrowserEngine, BrowserSession};
use crate::error::{AppError, Result};

/// Hands out at most `max_sessions` live sessions from one shared engine.
#[derive(Clone)]
pub struct BrowserPool {
    engine: Arc<dyn BrowserEngine>,
    permits: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(engine: Arc<dyn BrowserEngine>, max_sessions: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Sessions that can be opened without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot without opening anything yet.
    pub async fn reserve(&self) -> Result<SessionSlot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::browser("session pool closed"))?;
        Ok(SessionSlot {
            engine: Arc::clone(&self.engine),
            permit,
        })
    }

    /// Wait for a free slot, then open a session.
    pub async fn acquire(&self, user_agent: &str) -> Result<SessionLease> {
        self.reserve().await?.open(user_agent).await
    }
}

/// A reserved pool slot with no session behind it yet.
pub struct SessionSlot {
    engine: Arc<dyn BrowserEngine>,
    permit: OwnedSemaphorePermit,
}

impl SessionSlot {
    /// Open a session in this slot. A failed open gives the slot back.
    pub async fn open(self, user_agent: &str) -> Result<SessionLease> {
        let session = self.engine.new_session(user_agent).await?;
        Ok(SessionLease {
            session: Some(session),
            permit: Some(self.permit),
        })
    }
}

/// Exclusive use of one session.
///
/// Call [`SessionLease::release`] when done; a lease dropped without release
/// (error path, timeout, cancellation) closes its session in the background
/// and frees the slot only once the close finishes.
pub struct SessionLease {
    session: Option<Box<dyn BrowserSession>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl SessionLease {
    pub fn session(&mut self) -> Result<&mut (dyn BrowserSession + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| AppError::browser("session already released"))
    }

    /// Close the session and return its slot to the pool.
    pub async fn release(mut self) -> Result<()> {
        let result = match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        self.permit.take();
        result
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        log::warn!("Failed to close abandoned browser session: {e}");
                    }
                    drop(permit);
                });
            }
            Err(_) => log::warn!("Browser session dropped outside a runtime; not closed"),
        }
    }
}
