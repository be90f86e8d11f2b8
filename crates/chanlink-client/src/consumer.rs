use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ClientError, Result};

/// Callback invoked with the `data` of every push naming its consumer.
pub type ConsumerHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Name → handler registry for unsolicited pushes.
#[derive(Default)]
pub struct ConsumerRegistry {
    handlers: HashMap<String, ConsumerHandler>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: ConsumerHandler) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ClientError::InvalidConsumer(
                "consumer name must not be empty".to_string(),
            ));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Remove a registration. Returns whether one existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Result<ConsumerHandler> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::ConsumerNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_returns_registered_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut registry = ConsumerRegistry::new();
        registry
            .register("alerts", Arc::new(move |data: Value| sink.lock().unwrap().push(data)))
            .unwrap();

        let handler = registry.lookup("alerts").unwrap();
        handler(json!({"level": "high"}));
        assert_eq!(*seen.lock().unwrap(), vec![json!({"level": "high"})]);
    }

    #[test]
    fn missing_consumer_is_an_error() {
        let registry = ConsumerRegistry::new();
        let err = registry.lookup("ghost").err().expect("lookup should fail");
        assert!(matches!(err, ClientError::ConsumerNotFound(ref name) if name == "ghost"));
        assert_eq!(err.to_string(), "consumer ghost not found");
    }

    #[test]
    fn last_registration_wins() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let first = hits.clone();
        let second = hits.clone();

        let mut registry = ConsumerRegistry::new();
        registry
            .register("feed", Arc::new(move |_: Value| first.lock().unwrap().push("first")))
            .unwrap();
        registry
            .register("feed", Arc::new(move |_: Value| second.lock().unwrap().push("second")))
            .unwrap();

        registry.lookup("feed").unwrap()(Value::Null);
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_empty_name_and_unregisters() {
        let mut registry = ConsumerRegistry::new();
        assert!(matches!(
            registry.register("  ", Arc::new(|_: Value| {})),
            Err(ClientError::InvalidConsumer(_))
        ));

        registry.register("b", Arc::new(|_: Value| {})).unwrap();
        registry.register("a", Arc::new(|_: Value| {})).unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(matches!(
            registry.lookup("a"),
            Err(ClientError::ConsumerNotFound(_))
        ));
    }
}
