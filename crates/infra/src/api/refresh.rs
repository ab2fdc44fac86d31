//! Single-flight session refresh
//!
//! Concurrent 401s must not each start a refresh: rotating refresh tokens
//! would invalidate each other. The first caller installs a shared future in
//! the slot; everyone arriving while it is pending awaits that same future.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use super::auth::CredentialProvider;

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// Deduplicates concurrent calls to [`CredentialProvider::refresh`]
#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<Option<RefreshFuture>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently pending
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().as_ref().is_some_and(|pending| pending.peek().is_none())
    }

    /// Join the pending refresh, or start one if none is pending
    pub async fn refresh(&self, credentials: Arc<dyn CredentialProvider>) -> bool {
        let pending = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => {
                    debug!("Joining in-flight session refresh");
                    pending.clone()
                }
                _ => {
                    debug!("Starting session refresh");
                    let started = async move { credentials.refresh().await }.boxed().shared();
                    *slot = Some(started.clone());
                    started
                }
            }
        };

        let refreshed = pending.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
            *slot = None;
        }

        refreshed
    }
}
