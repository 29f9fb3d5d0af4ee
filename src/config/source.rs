//! The source contract and the in-process source implementations.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::SourceError;
use super::flat::{deep_merge, flatten};
use super::value::Map;

pub const DEFAULT_MEMORY_PRIORITY: i32 = 0;
pub const DEFAULT_FILE_PRIORITY: i32 = 10;
pub const DEFAULT_GLOB_PRIORITY: i32 = 10;
pub const DEFAULT_ENV_PRIORITY: i32 = 20;

/// A named, prioritized provider of a flat key-value snapshot.
///
/// Sources with a lower priority load first; on key conflicts the higher
/// priority wins. `load` must return equivalent data on repeated calls when
/// nothing external changed, and must report inaccessible or malformed input
/// as an error rather than panicking.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    fn name(&self) -> String;

    fn priority(&self) -> i32;

    fn load(&self) -> Result<Map, SourceError>;

    /// Filesystem paths whose modification signals a possible change.
    ///
    /// Empty means the source is not watchable.
    fn watch_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

impl<S: ConfigSource + ?Sized> ConfigSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn priority(&self) -> i32 {
        (**self).priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        (**self).load()
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        (**self).watch_paths()
    }
}

/// An in-process map.
///
/// Nested maps and lists are flattened on the way in, so the stored copy has
/// the same shape as a decoded file. Clones share the same storage, so a handle kept by the caller can
/// [`update`](Self::update) the data after the source was handed to the
/// engine.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    priority: i32,
    data: Arc<RwLock<Map>>,
}

impl MemorySource {
    pub fn new(data: Map) -> Self {
        Self::with_priority(data, DEFAULT_MEMORY_PRIORITY)
    }

    pub fn with_priority(data: Map, priority: i32) -> Self {
        Self::named("memory", data, priority)
    }

    pub fn named(name: impl Into<String>, data: Map, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            data: Arc::new(RwLock::new(flatten(data))),
        }
    }

    /// Replaces the stored data.
    pub fn update(&self, data: Map) {
        *self.data.write() = flatten(data);
    }
}

impl ConfigSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&self) -> Result<Map, SourceError> {
        Ok(self.data.read().clone())
    }
}

/// Several sources merged into one logical source, in list order.
#[derive(Debug)]
pub struct CompositeSource {
    name: String,
    priority: i32,
    sources: Vec<Box<dyn ConfigSource>>,
}

impl CompositeSource {
    pub fn new(name: impl Into<String>, priority: i32, sources: Vec<Box<dyn ConfigSource>>) -> Self {
        Self {
            name: name.into(),
            priority,
            sources,
        }
    }

    pub fn add_source(&mut self, source: impl ConfigSource + 'static) {
        self.sources.push(Box::new(source));
    }
}

impl ConfigSource for CompositeSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&self) -> Result<Map, SourceError> {
        let mut merged = Map::new();
        for source in &self.sources {
            let data = source.load().map_err(|e| SourceError::Composite {
                name: self.name.clone(),
                source: Box::new(e),
            })?;
            deep_merge(&mut merged, data);
        }
        Ok(merged)
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.sources.iter().flat_map(|s| s.watch_paths()).collect()
    }
}

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Gates an inner source behind a predicate evaluated on every call.
pub struct ConditionalSource {
    inner: Box<dyn ConfigSource>,
    condition: Predicate,
}

impl ConditionalSource {
    pub fn new(
        inner: impl ConfigSource + 'static,
        condition: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Box::new(inner),
            condition: Arc::new(condition),
        }
    }
}

impl fmt::Debug for ConditionalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalSource")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ConfigSource for ConditionalSource {
    fn name(&self) -> String {
        format!("conditional:{}", self.inner.name())
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        if !(self.condition)() {
            return Ok(Map::new());
        }
        self.inner.load()
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        if (self.condition)() {
            self.inner.watch_paths()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Sources with observable side effects, shared by unit tests.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::value::Value;

    /// Counts loads and reports the count under `count`.
    #[derive(Debug, Default, Clone)]
    pub struct CountingSource {
        pub calls: Arc<AtomicU32>,
    }

    impl ConfigSource for CountingSource {
        fn name(&self) -> String {
            "counter".to_string()
        }

        fn priority(&self) -> i32 {
            0
        }

        fn load(&self) -> Result<Map, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Map::from([("count".to_string(), Value::Int(i64::from(n)))]))
        }
    }

    /// Fails a fixed number of times, then succeeds.
    #[derive(Debug, Default, Clone)]
    pub struct FlakySource {
        pub failures: u32,
        pub calls: Arc<AtomicU32>,
    }

    impl ConfigSource for FlakySource {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn priority(&self) -> i32 {
            7
        }

        fn load(&self) -> Result<Map, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(SourceError::Other(format!("boom {n}")));
            }
            Ok(Map::from([("ok".to_string(), Value::Bool(true))]))
        }

        fn watch_paths(&self) -> Vec<PathBuf> {
            vec![PathBuf::from("/tmp/flaky.yaml")]
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::testing::FlakySource;
    use super::*;
    use crate::config::value::Value;

    fn map(entries: &[(&str, Value)]) -> Map {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_memory_source_returns_copy() {
        let source = MemorySource::new(map(&[("a", Value::Int(1))]));
        let mut first = source.load().unwrap();
        first.insert("b".into(), Value::Int(2));
        assert_eq!(source.load().unwrap(), map(&[("a", Value::Int(1))]));
        assert!(source.watch_paths().is_empty());
    }

    #[test]
    fn test_memory_source_flattens_nested_data() {
        let source = MemorySource::new(map(&[(
            "db",
            Value::Map(map(&[("host", Value::from("h"))])),
        )]));
        assert_eq!(source.load().unwrap(), map(&[("db.host", Value::from("h"))]));
    }

    #[test]
    fn test_memory_source_update_is_shared_between_clones() {
        let source = MemorySource::new(Map::new());
        let handle = source.clone();
        handle.update(map(&[("k", Value::from("v"))]));
        assert_eq!(source.load().unwrap()["k"], Value::from("v"));
    }

    #[test]
    fn test_composite_merges_in_list_order() {
        let composite = CompositeSource::new(
            "stack",
            5,
            vec![
                Box::new(MemorySource::new(map(&[("a", Value::Int(1)), ("b", Value::Int(1))])))
                    as Box<dyn ConfigSource>,
                Box::new(MemorySource::new(map(&[("b", Value::Int(2))]))),
            ],
        );
        let data = composite.load().unwrap();
        assert_eq!(data, map(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
        assert_eq!(composite.name(), "stack");
        assert_eq!(composite.priority(), 5);
    }

    #[test]
    fn test_composite_reports_own_name_on_failure() {
        let mut composite = CompositeSource::new("stack", 0, Vec::new());
        composite.add_source(FlakySource {
            failures: 10,
            ..Default::default()
        });
        let err = composite.load().unwrap_err();
        assert!(matches!(err, SourceError::Composite { ref name, .. } if name == "stack"));
        assert_eq!(
            composite.watch_paths(),
            vec![PathBuf::from("/tmp/flaky.yaml")]
        );
    }

    #[test]
    fn test_conditional_source_gates_load_and_watch_paths() {
        let enabled = Arc::new(AtomicBool::new(false));
        let flag = enabled.clone();
        let source = ConditionalSource::new(FlakySource::default(), move || flag.load(Ordering::SeqCst));

        assert!(source.load().unwrap().is_empty());
        assert!(source.watch_paths().is_empty());

        enabled.store(true, Ordering::SeqCst);
        assert_eq!(source.load().unwrap()["ok"], Value::Bool(true));
        assert_eq!(source.watch_paths().len(), 1);
        assert_eq!(source.name(), "conditional:flaky");
        assert_eq!(source.priority(), 7);
    }
}
