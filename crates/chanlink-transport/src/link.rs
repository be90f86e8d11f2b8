use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, watch};

use crate::error::{Result, TransportError};
use crate::traits::{LinkState, TransportEvent};

/// State and event plumbing shared by every transport implementation.
///
/// Guarantees that `Opened`/`Closed` are emitted exactly once per transition:
/// `Closed` is only reported for a link that was actually open.
pub(crate) struct LinkCore {
    state: watch::Sender<LinkState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl LinkCore {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub(crate) fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::EventsTaken)
    }

    /// Mark the link open. No-op once shut down.
    pub(crate) fn opened(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() || state.is_open() {
                return false;
            }
            *state = LinkState::Open;
            true
        });
        if changed {
            let _ = self.events_tx.send(TransportEvent::Opened);
        }
    }

    /// Leave the open state for `next` (`Reconnecting` or `Shutdown`).
    pub(crate) fn closed(&self, next: LinkState) {
        let mut was_open = false;
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            was_open = state.is_open();
            *state = next;
            true
        });
        if was_open {
            let _ = self.events_tx.send(TransportEvent::Closed);
        }
    }

    pub(crate) fn message(&self, text: String) {
        let _ = self.events_tx.send(TransportEvent::Message(text));
    }

    /// Error to report from `send` when the link does not accept messages.
    pub(crate) fn not_ready(&self) -> TransportError {
        if self.state().is_terminal() {
            TransportError::Shutdown
        } else {
            TransportError::NotReady
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_only_reported_after_open() {
        let link = LinkCore::new();
        let mut events = link.take_events().unwrap();

        link.closed(LinkState::Reconnecting);
        assert!(events.try_recv().is_err());

        link.opened();
        link.opened();
        link.closed(LinkState::Reconnecting);
        link.closed(LinkState::Reconnecting);

        assert_eq!(events.try_recv().unwrap(), TransportEvent::Opened);
        assert_eq!(events.try_recv().unwrap(), TransportEvent::Closed);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn shutdown_is_terminal() {
        let link = LinkCore::new();
        link.closed(LinkState::Shutdown);
        link.opened();
        assert_eq!(link.state(), LinkState::Shutdown);
        assert!(matches!(link.not_ready(), TransportError::Shutdown));
    }

    #[test]
    fn events_can_only_be_taken_once() {
        let link = LinkCore::new();
        assert!(link.take_events().is_ok());
        assert!(matches!(
            link.take_events(),
            Err(TransportError::EventsTaken)
        ));
    }
}
