//! Pluggable lifecycle units and their ordered registry (spec §4.E).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// A pluggable unit with init/start/stop/health lifecycle (spec GLOSSARY
/// "Component").
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn health_check(&self) -> bool {
        true
    }
}

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("component '{0}' added after the registry was initialized")]
    AlreadyInitialized(String),
    #[error("component '{name}' failed to initialize: {source}")]
    InitFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("component '{name}' failed to start: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Ordered, insertion-preserving collection of components (spec §4.E).
#[derive(Default)]
pub struct ComponentRegistry {
    components: Mutex<Vec<Arc<dyn Component>>>,
    initialized: AtomicBool,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            components: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Appends `component`. Rejected once [`initialize_all`] has run
    /// (spec §4.E "add(component) — allowed only before initialization").
    pub fn add(&self, component: Arc<dyn Component>) -> Result<(), ComponentError> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(ComponentError::AlreadyInitialized(component.name().to_string()));
        }
        self.components.lock().push(component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.lock().iter().find(|c| c.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.components.lock().iter().map(|c| c.name().to_string()).collect()
    }

    /// Initializes every component in insertion order; the first failure
    /// short-circuits and is propagated (spec §4.E).
    pub fn initialize_all(&self) -> Result<(), ComponentError> {
        self.initialized.store(true, Ordering::Release);
        let components = self.components.lock().clone();
        for component in components {
            component
                .initialize()
                .map_err(|source| ComponentError::InitFailed {
                    name: component.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Starts every component in insertion order; the first failure
    /// short-circuits (spec §4.E).
    pub fn start_all(&self) -> Result<(), ComponentError> {
        let components = self.components.lock().clone();
        for component in components {
            component
                .start()
                .map_err(|source| ComponentError::StartFailed {
                    name: component.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Stops every component in reverse insertion order; failures are
    /// logged and never prevent the remaining components from being
    /// stopped (spec §4.E).
    pub fn stop_all(&self) {
        let components = self.components.lock().clone();
        for component in components.iter().rev() {
            if let Err(err) = component.stop() {
                tracing::warn!(component = component.name(), error = %err, "component failed to stop");
            }
        }
    }

    /// AND of every component's `health_check`; an empty registry is
    /// healthy (spec §4.E / §8 "Component health aggregation").
    pub fn health_all(&self) -> bool {
        self.components.lock().iter().all(|c| c.health_check())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct OrderRecorder {
        name: String,
        log: Arc<StdMutex<Vec<String>>>,
        healthy: bool,
    }

    impl Component for OrderRecorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            Ok(())
        }

        fn start(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            Ok(())
        }

        fn health_check(&self) -> bool {
            self.healthy
        }
    }

    fn recorder(name: &str, log: Arc<StdMutex<Vec<String>>>, healthy: bool) -> Arc<dyn Component> {
        Arc::new(OrderRecorder {
            name: name.to_string(),
            log,
            healthy,
        })
    }

    #[test]
    fn stop_order_is_reverse_of_insertion() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ComponentRegistry::new();
        registry.add(recorder("a", log.clone(), true)).unwrap();
        registry.add(recorder("b", log.clone(), true)).unwrap();
        registry.add(recorder("c", log.clone(), true)).unwrap();

        registry.initialize_all().unwrap();
        registry.start_all().unwrap();
        registry.stop_all();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "init:a", "init:b", "init:c", "start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a",
            ]
        );
    }

    #[test]
    fn add_after_initialize_is_rejected() {
        let registry = ComponentRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        registry.initialize_all().unwrap();
        let err = registry.add(recorder("late", log, true)).unwrap_err();
        assert!(matches!(err, ComponentError::AlreadyInitialized(_)));
    }

    #[test]
    fn health_all_is_and_of_components() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let registry = ComponentRegistry::new();
        registry.add(recorder("a", log.clone(), true)).unwrap();
        registry.add(recorder("b", log.clone(), false)).unwrap();
        assert!(!registry.health_all());
    }

    #[test]
    fn health_all_on_empty_registry_is_true() {
        let registry = ComponentRegistry::new();
        assert!(registry.health_all());
    }

    struct FailingInit {
        name: String,
    }
    impl Component for FailingInit {
        fn name(&self) -> &str {
            &self.name
        }
        fn initialize(&self) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[test]
    fn first_init_failure_short_circuits() {
        let registry = ComponentRegistry::new();
        registry
            .add(Arc::new(FailingInit { name: "bad".to_string() }))
            .unwrap();
        let err = registry.initialize_all().unwrap_err();
        assert!(matches!(err, ComponentError::InitFailed { .. }));
    }
}
