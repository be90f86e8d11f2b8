use chanlink_transport::LinkState;
use tokio::sync::watch;

/// The transport reached a state from which it will never become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport closed and will not reopen")]
pub struct GateClosed;

/// Defers actions until the transport reports it is open.
///
/// Waiting suspends on the transport's state signal instead of polling, and
/// fails with [`GateClosed`] once the link is shut down for good.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    state: watch::Receiver<LinkState>,
}

impl ReadinessGate {
    pub fn new(state: watch::Receiver<LinkState>) -> Self {
        Self { state }
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_open()
    }

    /// Complete once the link is open. Returns immediately if it already is.
    pub async fn wait_ready(&mut self) -> Result<(), GateClosed> {
        let open = self
            .state
            .wait_for(|state| state.is_open() || state.is_terminal())
            .await
            .map_err(|_| GateClosed)?
            .is_open();
        if open {
            Ok(())
        } else {
            Err(GateClosed)
        }
    }

    /// Wait for the link to open, then run `action`.
    pub async fn when_ready<T>(&mut self, action: impl FnOnce() -> T) -> Result<T, GateClosed> {
        self.wait_ready().await?;
        Ok(action())
    }

    /// Wait for the next state change after the one last observed.
    pub async fn changed(&mut self) -> Result<(), GateClosed> {
        self.state.changed().await.map_err(|_| GateClosed)
    }
}
