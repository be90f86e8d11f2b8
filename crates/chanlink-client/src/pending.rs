use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::ids::CallId;

pub(crate) type ReplySender = oneshot::Sender<Result<Value, ClientError>>;

/// An in-flight call waiting for its reply.
#[derive(Debug)]
pub struct PendingRecord {
    endpoint: String,
    created_at: Instant,
    reply: ReplySender,
}

impl PendingRecord {
    pub(crate) fn new(endpoint: impl Into<String>, reply: ReplySender) -> Self {
        Self {
            endpoint: endpoint.into(),
            created_at: Instant::now(),
            reply,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Settle the call's future. Consumes the record, so it can happen once.
    pub(crate) fn settle(self, result: Result<Value, ClientError>) {
        // The caller may have dropped its future; nothing left to notify then.
        let _ = self.reply.send(result);
    }
}

/// `CallId` → in-flight call.
///
/// Records leave the table only through [`take`](Self::take) or
/// [`drain`](Self::drain), which hand ownership to whoever settles them.
#[derive(Debug, Default)]
pub struct PendingTable {
    calls: HashMap<CallId, PendingRecord>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, cmd_id: CallId, record: PendingRecord) {
        self.calls.insert(cmd_id, record);
    }

    pub fn take(&mut self, cmd_id: CallId) -> Option<PendingRecord> {
        self.calls.remove(&cmd_id)
    }

    pub fn contains(&self, cmd_id: CallId) -> bool {
        self.calls.contains_key(&cmd_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Identifiers of in-flight calls, ascending.
    pub fn ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn drain(&mut self) -> Vec<(CallId, PendingRecord)> {
        let mut drained: Vec<_> = self.calls.drain().collect();
        drained.sort_unstable_by_key(|(id, _)| *id);
        drained
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn take_removes_exactly_once() {
        let mut table = PendingTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.insert(CallId::new(1), PendingRecord::new("echo", tx));
        assert!(table.contains(CallId::new(1)));

        let record = table.take(CallId::new(1)).expect("record should exist");
        assert_eq!(record.endpoint(), "echo");
        assert!(table.take(CallId::new(1)).is_none());
        assert!(table.is_empty());

        record.settle(Ok(json!({"ok": true})));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn settle_tolerates_dropped_receiver() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        PendingRecord::new("echo", tx).settle(Ok(Value::Null));
    }

    #[test]
    fn ids_and_drain_are_sorted() {
        let mut table = PendingTable::new();
        for raw in [5, 2, 9] {
            let (tx, _rx) = oneshot::channel();
            table.insert(CallId::new(raw), PendingRecord::new("e", tx));
        }
        assert_eq!(
            table.ids(),
            vec![CallId::new(2), CallId::new(5), CallId::new(9)]
        );

        let drained: Vec<_> = table.drain().into_iter().map(|(id, _)| id).collect();
        assert_eq!(drained, vec![CallId::new(2), CallId::new(5), CallId::new(9)]);
        assert_eq!(table.len(), 0);
    }
}
