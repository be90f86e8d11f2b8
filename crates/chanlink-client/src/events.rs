use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Connectivity transitions observed on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected => f.write_str("connected"),
            ConnectionEvent::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Handle returned by listener registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered listener list.
///
/// Listeners run in registration order. The list is snapshotted before
/// delivery, so a listener may subscribe or unsubscribe others while running.
pub(crate) struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Listeners<E> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_registration_order() {
        let listeners = Listeners::<ConnectionEvent>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = log.clone();
        listeners.subscribe(Arc::new(move |event: &ConnectionEvent| {
            first.lock().unwrap().push(format!("a:{event}"))
        }));
        let second = log.clone();
        listeners.subscribe(Arc::new(move |event: &ConnectionEvent| {
            second.lock().unwrap().push(format!("b:{event}"))
        }));

        listeners.emit(&ConnectionEvent::Connected);
        listeners.emit(&ConnectionEvent::Disconnected);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:connected", "b:connected", "a:disconnected", "b:disconnected"]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let listeners = Listeners::<ConnectionEvent>::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        let id = listeners.subscribe(Arc::new(move |_: &ConnectionEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&ConnectionEvent::Connected);
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&ConnectionEvent::Connected);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }
}
