use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::client::Shared;
use crate::ids::CallId;

#[derive(Debug)]
struct Attached {
    cmd_id: CallId,
    shared: Weak<Shared>,
}

/// Caller-held handle that can cancel the call it is attached to.
///
/// A token is attached when passed in [`CallOptions`](crate::CallOptions).
/// Cancelling removes the pending call, queues a cancellation notice behind
/// the call itself, and rejects the call's future with
/// [`ClientError::Cancelled`](crate::ClientError::Cancelled). Once the call
/// has settled, cancelling is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Mutex<Option<Attached>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the attached call, if any.
    pub fn cmd_id(&self) -> Option<CallId> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|attached| attached.cmd_id)
    }

    /// Cancel the attached call. Returns true if this settled it.
    pub fn cancel(&self) -> bool {
        let target = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|attached| (attached.cmd_id, attached.shared.clone()));
        let Some((cmd_id, shared)) = target else {
            return false;
        };
        match shared.upgrade() {
            Some(shared) => shared.cancel_call(cmd_id),
            None => false,
        }
    }

    pub(crate) fn attach(&self, cmd_id: CallId, shared: Weak<Shared>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Attached { cmd_id, shared });
    }
}
