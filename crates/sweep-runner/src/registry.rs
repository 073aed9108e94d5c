use crate::components;
use crate::config::ComponentSpec;
use crate::error::ConfigError;
use crate::protocol::{ResultListener, ResultProducer};
use serde_json::Value;
use std::collections::BTreeMap;

pub type ProducerFactory = fn(&Value) -> Result<Box<dyn ResultProducer>, String>;
pub type ListenerFactory = fn(&Value) -> Result<Box<dyn ResultListener>, String>;

/// Maps the `kind` of a [`ComponentSpec`] to the factory that builds it.
pub struct ComponentRegistry {
    producers: BTreeMap<String, ProducerFactory>,
    listeners: BTreeMap<String, ListenerFactory>,
}

impl Default for ComponentRegistry {
    /// Registry with the built-in `command` producer and `jsonl`/`stdout` listeners.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_producer("command", components::command_producer);
        registry.register_listener("jsonl", components::jsonl_listener);
        registry.register_listener("stdout", components::stdout_listener);
        registry
    }
}

impl ComponentRegistry {
    pub fn empty() -> Self {
        Self {
            producers: BTreeMap::new(),
            listeners: BTreeMap::new(),
        }
    }

    /// Registers `factory` under `kind`, replacing any earlier registration.
    pub fn register_producer(&mut self, kind: impl Into<String>, factory: ProducerFactory) {
        self.producers.insert(kind.into(), factory);
    }

    pub fn register_listener(&mut self, kind: impl Into<String>, factory: ListenerFactory) {
        self.listeners.insert(kind.into(), factory);
    }

    pub fn producer_kinds(&self) -> Vec<&str> {
        self.producers.keys().map(String::as_str).collect()
    }

    pub fn listener_kinds(&self) -> Vec<&str> {
        self.listeners.keys().map(String::as_str).collect()
    }

    pub fn build_producer(
        &self,
        spec: &ComponentSpec,
    ) -> Result<Box<dyn ResultProducer>, ConfigError> {
        let factory = self
            .producers
            .get(&spec.kind)
            .ok_or_else(|| ConfigError::UnknownComponent {
                role: "producer",
                kind: spec.kind.clone(),
            })?;
        factory(&spec.settings).map_err(|message| ConfigError::ComponentSettings {
            role: "producer",
            kind: spec.kind.clone(),
            message,
        })
    }

    pub fn build_listener(
        &self,
        spec: &ComponentSpec,
    ) -> Result<Box<dyn ResultListener>, ConfigError> {
        let factory = self
            .listeners
            .get(&spec.kind)
            .ok_or_else(|| ConfigError::UnknownComponent {
                role: "listener",
                kind: spec.kind.clone(),
            })?;
        factory(&spec.settings).map_err(|message| ConfigError::ComponentSettings {
            role: "listener",
            kind: spec.kind.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeProducer;
    use serde_json::json;

    #[test]
    fn default_registry_knows_the_builtins() {
        let registry = ComponentRegistry::default();
        assert_eq!(registry.producer_kinds(), vec!["command"]);
        assert_eq!(registry.listener_kinds(), vec!["jsonl", "stdout"]);

        let producer = registry
            .build_producer(&ComponentSpec::new("command", json!({"command": ["./eval"]})))
            .expect("command");
        assert_eq!(producer.type_name(), "CommandProducer");
        registry
            .build_listener(&ComponentSpec::kind_only("stdout"))
            .expect("stdout");
    }

    #[test]
    fn unknown_kinds_and_bad_settings_are_config_errors() {
        let registry = ComponentRegistry::default();
        let err = registry
            .build_producer(&ComponentSpec::kind_only("weka"))
            .err()
            .expect("unknown");
        assert_eq!(
            err,
            ConfigError::UnknownComponent {
                role: "producer",
                kind: "weka".to_string(),
            }
        );

        let err = registry
            .build_listener(&ComponentSpec::kind_only("jsonl"))
            .err()
            .expect("missing path");
        assert!(matches!(
            err,
            ConfigError::ComponentSettings { role: "listener", .. }
        ));
    }

    fn fake_producer(_settings: &Value) -> Result<Box<dyn ResultProducer>, String> {
        Ok(Box::new(FakeProducer::default()))
    }

    #[test]
    fn custom_factories_can_be_registered() {
        let mut registry = ComponentRegistry::empty();
        registry.register_producer("fake", fake_producer);
        let producer = registry
            .build_producer(&ComponentSpec::kind_only("fake"))
            .expect("fake");
        assert_eq!(producer.type_name(), "FakeProducer");
    }
}
