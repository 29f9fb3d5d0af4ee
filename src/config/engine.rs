//! The resolution engine: ordered sources, merge, validation, observers and
//! the watch loop.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::bind::{bind_map, Bindable};
use super::convert::{parse_duration, Convertible, ConverterRegistry, Kind, Target};
use super::encryption::EncryptionProcessor;
use super::error::{ConfigError, ConvertError, ValidationErrors};
use super::extract;
use super::flat::{deep_merge, diff};
use super::hooks::{Hook, HookManager, LoadContext, Observer};
use super::middleware::{chain, Middleware};
use super::profiles::ProfileSet;
use super::rules::{self, Rule, ValidatorRegistry};
use super::source::ConfigSource;
use super::template::TemplateProcessor;
use super::value::{Map, Value};

/// A live, shareable configuration.
///
/// `Config` is a cheap handle: clones share the same sources, merged state
/// and watch loop. Sources are kept sorted by ascending priority (stable for
/// equal priorities) and merged in that order on every [`load`](Self::load),
/// so higher priorities win on conflicting keys.
///
/// ## Example
///
/// ```no_run
/// use layerconf::{Config, FileSource, EnvSource};
///
/// let config = Config::new();
/// config.add_source(FileSource::new("config/app.yaml"));
/// config.add_source(EnvSource::new("APP_"));
/// config.load()?;
///
/// let port = config.get_int_or("server.port", 8080);
/// # Ok::<(), layerconf::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct Config {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<State>,
    loading: Mutex<()>,
    templates: Arc<TemplateProcessor>,
    watcher: Mutex<Option<watch::Sender<bool>>>,
}

pub(crate) struct State {
    pub(crate) sources: Vec<Box<dyn ConfigSource>>,
    pub(crate) data: Map,
    pub(crate) rules: BTreeMap<String, String>,
    pub(crate) hooks: HookManager,
    pub(crate) observers: Vec<Arc<dyn Observer>>,
    pub(crate) converters: ConverterRegistry,
    pub(crate) validators: ValidatorRegistry,
    pub(crate) encryption: Option<EncryptionProcessor>,
    pub(crate) profiles: ProfileSet,
}

impl Config {
    /// An empty engine with no sources.
    pub fn new() -> Self {
        Self::with_templates(Arc::new(TemplateProcessor::new()))
    }

    pub(crate) fn with_templates(templates: Arc<TemplateProcessor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    sources: Vec::new(),
                    data: Map::new(),
                    rules: BTreeMap::new(),
                    hooks: HookManager::new(),
                    observers: Vec::new(),
                    converters: ConverterRegistry::new(),
                    validators: ValidatorRegistry::new(),
                    encryption: None,
                    profiles: ProfileSet::default(),
                }),
                loading: Mutex::new(()),
                templates,
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Creates a [`ConfigBuilder`](super::ConfigBuilder).
    pub fn builder() -> super::ConfigBuilder {
        super::ConfigBuilder::new()
    }

    pub(crate) fn state(&self) -> &RwLock<State> {
        &self.inner.state
    }

    /// Registers a source. It contributes on the next load.
    pub fn add_source(&self, source: impl ConfigSource + 'static) {
        self.add_boxed_source(Box::new(source));
    }

    /// Registers a source wrapped in `middlewares`, first listed outermost.
    pub fn add_source_with_middleware(
        &self,
        source: impl ConfigSource + 'static,
        middlewares: &[Middleware],
    ) {
        self.add_boxed_source(chain(Box::new(source), middlewares));
    }

    pub(crate) fn add_boxed_source(&self, source: Box<dyn ConfigSource>) {
        let mut state = self.inner.state.write();
        debug!(source = %source.name(), priority = source.priority(), "adding config source");
        state.add_source(source);
    }

    /// Removes every source called `name`. Returns whether any was removed.
    pub fn remove_source(&self, name: &str) -> bool {
        let mut state = self.inner.state.write();
        let before = state.sources.len();
        state.sources.retain(|s| s.name() != name);
        before != state.sources.len()
    }

    /// Source names in load order.
    pub fn source_names(&self) -> Vec<String> {
        self.inner.state.read().sources_in_order().map(|s| s.name()).collect()
    }

    /// Loads every source and replaces the merged state.
    ///
    /// Validation runs after the new state is committed, so a
    /// [`ConfigError::Validation`] still leaves the freshly merged values in
    /// place.
    ///
    /// Hooks run without the engine lock held, so they may read the config.
    /// Loads are serialized; a hook must not call [`load`](Self::load) itself.
    pub fn load(&self) -> Result<(), ConfigError> {
        let _serial = self.inner.loading.lock();
        let (hooks, ctx) = {
            let state = self.inner.state.read();
            let names = state.sources_in_order().map(|s| s.name()).collect();
            (state.hooks.clone(), LoadContext::new(names))
        };
        hooks.run_pre_load(&ctx)?;

        let mut merged = self.inner.state.read().merge_sources()?;
        hooks.run_post_load(&mut merged)?;

        let mut state = self.inner.state.write();
        state.commit(merged);
        state.validate_all().map_err(ConfigError::from)
    }

    /// Starts polling the sources' watch paths every `interval`, reloading
    /// when any modification time changes.
    ///
    /// Must be called from within a Tokio runtime. Calling it again replaces
    /// the running loop. Background reload failures are logged, never
    /// returned.
    pub fn watch(&self, interval: Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval(interval));
        }
        let paths = self.watch_paths();
        if paths.is_empty() {
            return Err(ConfigError::NoWatchableSources);
        }
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let (cancel, cancelled) = watch::channel(false);
        if let Some(previous) = self.inner.watcher.lock().replace(cancel) {
            previous.send_replace(true);
        }

        info!(paths = paths.len(), ?interval, "Watching configuration for changes");
        runtime.spawn(watch_loop(
            Arc::downgrade(&self.inner),
            interval,
            snapshot(&paths),
            cancelled,
        ));
        Ok(())
    }

    /// Stops the watch loop. Safe to call repeatedly.
    pub fn close(&self) {
        if let Some(cancel) = self.inner.watcher.lock().take() {
            cancel.send_replace(true);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watcher.lock().is_some()
    }

    /// Every watch path currently reported by the sources.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        self.inner.state.read().watch_paths()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.read().data.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.read().data.contains_key(key)
    }

    /// Returns the value for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is absent.
    pub fn must_get(&self, key: &str) -> Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("required config key {key:?} not found"),
        }
    }

    /// Any non-map value, in its canonical string form.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Map(_) => None,
            other => Some(other.to_string()),
        })
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| match v {
            Value::Int(i) => Some(i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    /// Strings count as true when they read `true`, `1` or `yes`; any other
    /// scalar is false.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| match v {
            Value::Bool(b) => Some(b),
            Value::Map(_) | Value::List(_) => None,
            other => {
                let s = other.to_string();
                let s = s.trim();
                Some(
                    s.eq_ignore_ascii_case("true")
                        || s == "1"
                        || s.eq_ignore_ascii_case("yes"),
                )
            }
        })
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Accepts unit-suffixed strings such as `1m30s`; bare numbers are
    /// seconds.
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        self.get(key).and_then(|v| parse_duration(&v).ok())
    }

    pub fn get_duration_or(&self, key: &str, default: Duration) -> Duration {
        self.get_duration(key).unwrap_or(default)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| match v {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn get_float_or(&self, key: &str, default: f64) -> f64 {
        self.get_float(key).unwrap_or(default)
    }

    /// Indexed children (`key.0`, `key.1`, ...) take precedence; otherwise a
    /// list value is stringified element-wise and a scalar is split on
    /// commas.
    pub fn get_string_slice(&self, key: &str) -> Option<Vec<String>> {
        let state = self.inner.state.read();

        let indexed: Vec<String> = (0..)
            .map_while(|i| state.data.get(&format!("{key}.{i}")))
            .map(Value::to_string)
            .collect();
        if !indexed.is_empty() {
            return Some(indexed);
        }

        match state.data.get(key)? {
            Value::List(items) => Some(items.iter().map(Value::to_string).collect()),
            Value::Map(_) | Value::Null => None,
            Value::String(s) if s.is_empty() => Some(Vec::new()),
            scalar => Some(
                scalar
                    .to_string()
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .collect(),
            ),
        }
    }

    pub fn get_string_slice_or(&self, key: &str, default: &[&str]) -> Vec<String> {
        self.get_string_slice(key)
            .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }

    /// Converts the value at `key` through the engine's converter registry.
    pub fn get_as<T: Convertible>(&self, key: &str) -> Option<Result<T, ConvertError>> {
        let state = self.inner.state.read();
        state.data.get(key).map(|v| state.converters.convert::<T>(v))
    }

    /// Overrides a value in the merged state until the next load.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.state.write().data.insert(key.into(), value.into());
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.inner.state.read().data.keys().cloned().collect()
    }

    /// A copy of the whole merged state.
    pub fn all_settings(&self) -> Map {
        self.inner.state.read().data.clone()
    }

    /// Registers a rule expression such as `required,min=1`, replacing any
    /// previous rule for `key`.
    pub fn add_rule(&self, key: impl Into<String>, expression: impl Into<String>) {
        self.inner
            .state
            .write()
            .rules
            .insert(key.into(), expression.into());
    }

    pub fn add_rules(&self, rules: impl IntoIterator<Item = Rule>) {
        let mut state = self.inner.state.write();
        for rule in rules {
            state.rules.insert(rule.key().to_string(), rule.expression());
        }
    }

    pub fn rules(&self) -> BTreeMap<String, String> {
        self.inner.state.read().rules.clone()
    }

    /// Checks the current value of `key` against its rule. Keys without a
    /// rule always pass.
    pub fn validate_key(&self, key: &str) -> Result<(), ValidationErrors> {
        let state = self.inner.state.read();
        let Some(expression) = state.rules.get(key) else {
            return Ok(());
        };
        let mut errors = ValidationErrors::new();
        state.check_rule(key, expression, &mut errors);
        errors.into_result()
    }

    /// Checks every rule and reports all failures together.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.inner.state.read().validate_all()
    }

    pub fn register_validator(
        &self,
        tag: impl Into<String>,
        validator: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) {
        self.inner.state.write().validators.register(tag, validator);
    }

    /// Binds the merged state into a fresh `T`.
    pub fn bind<T: Bindable>(&self) -> Result<T, ConfigError> {
        let mut target = T::default();
        self.bind_into(&mut target)?;
        Ok(target)
    }

    /// Binds the merged state into an existing value; keys that are absent
    /// leave fields untouched.
    pub fn bind_into<T: Bindable>(&self, target: &mut T) -> Result<(), ConfigError> {
        let hooks = self.inner.state.read().hooks.clone();
        hooks.run_pre_bind(&*target as &dyn Any)?;
        {
            let state = self.inner.state.read();
            bind_map(target, &state.data, &state.converters)?;
        }
        hooks.run_post_bind(&*target as &dyn Any)?;
        Ok(())
    }

    /// Validates the rules, then binds.
    pub fn bind_and_validate<T: Bindable>(&self) -> Result<T, ConfigError> {
        self.validate_all()?;
        self.bind()
    }

    /// Deserializes the merged state through serde.
    ///
    /// Dotted keys are re-nested and indexed keys become arrays. String
    /// leaves are coerced to booleans and numbers where they parse as such.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let state = self.inner.state.read();
        extract::extract(&state.data)
    }

    pub fn register_converter<T: Send + 'static>(
        &self,
        converter: impl Fn(&Value) -> Result<T, ConvertError> + Send + Sync + 'static,
    ) {
        self.inner.state.write().converters.register(converter);
    }

    pub fn register_kind_converter(
        &self,
        kind: Kind,
        converter: impl Fn(&Value, &Target) -> Result<Value, ConvertError> + Send + Sync + 'static,
    ) {
        self.inner.state.write().converters.register_kind(kind, converter);
    }

    pub fn register_hook(&self, hook: impl Hook + 'static) {
        self.inner.state.write().hooks.register(Arc::new(hook));
    }

    pub fn hook_names(&self) -> Vec<String> {
        self.inner.state.read().hooks.names()
    }

    /// Registers an observer for the changed keys of each load.
    pub fn observe(&self, observer: impl Observer + 'static) {
        self.inner.state.write().observers.push(Arc::new(observer));
    }

    /// The engine's template processor, shared with every template
    /// middleware created through this engine or its builder.
    pub fn template_processor(&self) -> Arc<TemplateProcessor> {
        self.inner.templates.clone()
    }

    pub fn add_template_function(
        &self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.inner.templates.add_function(name, function);
    }

    pub fn set_encryption_processor(&self, processor: EncryptionProcessor) {
        self.inner.state.write().encryption = Some(processor);
    }

    pub fn encryption_processor(&self) -> Option<EncryptionProcessor> {
        self.inner.state.read().encryption.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Config")
            .field("sources", &state.sources_in_order().map(|s| s.name()).collect::<Vec<_>>())
            .field("keys", &state.data.len())
            .field("rules", &state.rules.len())
            .field("hooks", &state.hooks)
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl State {
    pub(crate) fn add_source(&mut self, source: Box<dyn ConfigSource>) {
        self.sources.push(source);
        self.sources.sort_by_key(|s| s.priority());
    }

    /// Registered sources by ascending priority, then the active profile.
    pub(crate) fn sources_in_order(
        &self,
    ) -> impl Iterator<Item = &(dyn ConfigSource + 'static)> + '_ {
        self.sources
            .iter()
            .map(Box::as_ref)
            .chain(self.profiles.source())
    }

    fn merge_sources(&self) -> Result<Map, ConfigError> {
        let mut merged = Map::new();
        for source in self.sources_in_order() {
            let data = source.load().map_err(|e| ConfigError::Source {
                name: source.name(),
                source: e,
            })?;
            debug!(source = %source.name(), keys = data.len(), "loaded config source");
            deep_merge(&mut merged, data);
        }
        Ok(merged)
    }

    /// Replaces the merged state and notifies observers of changed keys.
    fn commit(&mut self, merged: Map) {
        let changed = diff(&self.data, &merged);
        self.data = merged;
        debug!(
            keys = self.data.len(),
            changed = changed.len(),
            "configuration merged"
        );

        if !changed.is_empty() {
            notify(&self.observers, &changed);
        }
    }

    pub(crate) fn validate_all(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for (key, expression) in &self.rules {
            self.check_rule(key, expression, &mut errors);
        }
        errors.into_result()
    }

    fn check_rule(&self, key: &str, expression: &str, errors: &mut ValidationErrors) {
        match self.data.get(key) {
            None => {
                if rules::is_required(expression) {
                    errors.insert(key, "is required");
                }
            }
            Some(value) => {
                if let Err(message) = self.validators.check(value, expression) {
                    errors.insert(key, message);
                }
            }
        }
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.sources_in_order().flat_map(|s| s.watch_paths()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

fn notify(observers: &[Arc<dyn Observer>], changed: &Map) {
    for observer in observers {
        let observer = observer.clone();
        let changed = changed.clone();
        let spawned = thread::Builder::new()
            .name("layerconf-observer".into())
            .spawn(move || observer.on_change(&changed));
        if let Err(e) = spawned {
            warn!("failed to spawn config observer: {}", e);
        }
    }
}

type Snapshot = BTreeMap<PathBuf, Option<SystemTime>>;

fn snapshot(paths: &[PathBuf]) -> Snapshot {
    paths
        .iter()
        .map(|p| {
            let modified = std::fs::metadata(p).and_then(|m| m.modified()).ok();
            (p.clone(), modified)
        })
        .collect()
}

async fn watch_loop(
    engine: Weak<Inner>,
    interval: Duration,
    mut last: Snapshot,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = cancelled.changed() => {
                if changed.is_err() || *cancelled.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(inner) = engine.upgrade() else {
            break;
        };
        let config = Config { inner };

        // Re-read the paths each tick so glob sources pick up new files.
        let current = snapshot(&config.watch_paths());
        if current == last {
            continue;
        }
        last = current;

        match tokio::task::spawn_blocking(move || config.load()).await {
            Ok(Ok(())) => debug!("configuration reloaded"),
            Ok(Err(e)) => warn!("Background config reload failed: {}", e),
            Err(e) => error!("Config reload task panicked: {}", e),
        }
    }

    info!("Configuration watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;

    use super::*;
    use crate::config::hooks::{DefaultsHook, HookError};
    use crate::config::source::testing::{CountingSource, FlakySource};
    use crate::config::source::MemorySource;

    fn map(entries: &[(&str, Value)]) -> Map {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_higher_priority_wins() {
        let config = Config::new();
        config.add_source(MemorySource::with_priority(
            map(&[("port", Value::Int(2)), ("host", Value::from("b"))]),
            10,
        ));
        config.add_source(MemorySource::with_priority(
            map(&[("port", Value::Int(1)), ("debug", Value::Bool(true))]),
            0,
        ));
        config.load().unwrap();

        assert_eq!(config.get("port"), Some(Value::Int(2)));
        assert_eq!(config.get("host"), Some(Value::from("b")));
        assert_eq!(config.get("debug"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let config = Config::new();
        config.add_source(MemorySource::named("first", map(&[("k", Value::Int(1))]), 5));
        config.add_source(MemorySource::named("second", map(&[("k", Value::Int(2))]), 5));
        config.load().unwrap();

        assert_eq!(config.source_names(), vec!["first", "second"]);
        assert_eq!(config.get("k"), Some(Value::Int(2)));
    }

    #[test]
    fn test_source_failure_is_named() {
        let config = Config::new();
        config.add_source(FlakySource {
            failures: 1,
            ..Default::default()
        });
        let err = config.load().unwrap_err();
        assert!(matches!(err, ConfigError::Source { ref name, .. } if name == "flaky"));
        assert_eq!(err.to_string(), "source `flaky`: boom 1");
    }

    #[test]
    fn test_failed_load_keeps_previous_state() {
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[("a", Value::Int(1))])));
        config.load().unwrap();

        config.add_source(FlakySource {
            failures: 1,
            ..Default::default()
        });
        assert!(config.load().is_err());
        assert_eq!(config.all_keys(), vec!["a"]);
    }

    #[test]
    fn test_validation_error_after_commit() {
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[("port", Value::Int(0))])));
        config.add_rule("port", "min=1");
        config.add_rule("host", "required");

        let err = config.load().unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.get("host"), Some("is required"));
        assert_eq!(errors.get("port"), Some("must be >= 1"));
        // Merged state was committed anyway.
        assert_eq!(config.get("port"), Some(Value::Int(0)));
    }

    #[test]
    fn test_validate_key() {
        let config = Config::new();
        config.add_rules([Rule::required("name"), Rule::range("port", 1, 10)]);
        config.set("port", 5);

        assert!(config.validate_key("port").is_ok());
        assert!(config.validate_key("unruled").is_ok());
        let errors = config.validate_key("name").unwrap_err();
        assert_eq!(errors.get("name"), Some("is required"));
    }

    #[test]
    fn test_set_survives_until_next_load() {
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[("a", Value::Int(1))])));
        config.load().unwrap();

        config.set("a", 99);
        assert_eq!(config.get_int("a"), Some(99));
        config.load().unwrap();
        assert_eq!(config.get_int("a"), Some(1));
    }

    #[test]
    fn test_typed_getters() {
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[
            ("s", Value::from("text")),
            ("n", Value::from(" 42 ")),
            ("f", Value::from("2.5")),
            ("b", Value::from("yes")),
            ("off", Value::from("nope")),
            ("d", Value::from("1m30s")),
            ("list", Value::from("a, b,c")),
            ("empty", Value::from("")),
        ])));
        config.load().unwrap();

        assert_eq!(config.get_string("n").as_deref(), Some(" 42 "));
        assert_eq!(config.get_int("n"), Some(42));
        assert_eq!(config.get_int_or("s", 7), 7);
        assert_eq!(config.get_float("f"), Some(2.5));
        assert_eq!(config.get_bool("b"), Some(true));
        assert_eq!(config.get_bool("off"), Some(false));
        assert!(config.get_bool_or("missing", true));
        assert_eq!(config.get_duration("d"), Some(Duration::from_secs(90)));
        assert_eq!(
            config.get_duration_or("s", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(config.get_string_slice("list").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(config.get_string_slice("empty").unwrap(), Vec::<String>::new());
        assert_eq!(config.get_string_slice_or("missing", &["x"]), vec!["x"]);
        assert_eq!(config.get_string_or("missing", "dflt"), "dflt");
    }

    #[test]
    fn test_string_slice_prefers_indexed_children() {
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[(
            "hosts",
            Value::List(vec![Value::from("a,1"), Value::from("b")]),
        )])));
        config.load().unwrap();

        assert_eq!(config.get_string_slice("hosts").unwrap(), vec!["a,1", "b"]);
    }

    #[test]
    #[should_panic(expected = "required config key \"nope\" not found")]
    fn test_must_get_panics_on_missing_key() {
        Config::new().must_get("nope");
    }

    #[test]
    fn test_remove_source() {
        let config = Config::new();
        config.add_source(MemorySource::named("extra", map(&[("x", Value::Int(1))]), 0));
        config.load().unwrap();
        assert!(config.remove_source("extra"));
        assert!(!config.remove_source("extra"));
        config.load().unwrap();
        assert!(config.get("x").is_none());
    }

    #[test]
    fn test_post_load_hook_can_fill_defaults() {
        let config = Config::new();
        config.register_hook(DefaultsHook::new(map(&[("port", Value::Int(80))])));
        config.load().unwrap();
        assert_eq!(config.get_int("port"), Some(80));
    }

    struct Refuse;

    impl Hook for Refuse {
        fn name(&self) -> &str {
            "refuse"
        }

        fn pre_load(&self, _ctx: &LoadContext) -> Result<(), HookError> {
            Err("not now".into())
        }
    }

    #[test]
    fn test_pre_load_hook_failure_aborts_load() {
        let counter = CountingSource::default();
        let calls = counter.calls.clone();
        let config = Config::new();
        config.add_source(counter);
        config.register_hook(Refuse);

        let err = config.load().unwrap_err();
        assert_eq!(err.to_string(), "pre-load hook refuse: not now");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hook_error_keeps_source_chain() {
        let config = Config::new();
        config.register_hook(Refuse);
        let err = config.load().unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "not now");
    }

    struct ReadsBack {
        config: Config,
        seen: Arc<Mutex<Vec<Option<i64>>>>,
    }

    impl Hook for ReadsBack {
        fn name(&self) -> &str {
            "reads-back"
        }

        fn pre_load(&self, _ctx: &LoadContext) -> Result<(), HookError> {
            self.seen.lock().push(self.config.get_int("port"));
            Ok(())
        }

        fn post_load(&self, _data: &mut Map) -> Result<(), HookError> {
            self.seen.lock().push(self.config.get_int("port"));
            Ok(())
        }
    }

    #[test]
    fn test_hooks_may_read_config() {
        let (tx, rx) = mpsc::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = Config::new();
        config.add_source(MemorySource::new(map(&[("port", Value::Int(80))])));
        config.register_hook(ReadsBack {
            config: config.clone(),
            seen: seen.clone(),
        });

        let worker = config.clone();
        thread::spawn(move || {
            let first = worker.load();
            let second = worker.load();
            let _ = tx.send((first.is_ok(), second.is_ok()));
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (true, true));

        // Hooks see the state committed by the previous load.
        assert_eq!(*seen.lock(), vec![None, None, Some(80), Some(80)]);
    }

    #[test]
    fn test_observers_receive_changed_keys() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let source = MemorySource::new(map(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
        let config = Config::new();
        config.add_source(source.clone());
        config.observe(move |changed: &Map| {
            let _ = tx.lock().send(changed.clone());
        });

        config.load().unwrap();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.len(), 2);

        // Unchanged reload notifies nobody.
        config.load().unwrap();
        source.update(map(&[("a", Value::Int(1)), ("b", Value::Int(3))]));
        config.load().unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, map(&[("b", Value::Int(3))]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watch_requires_watch_paths() {
        let config = Config::new();
        config.add_source(MemorySource::new(Map::new()));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert!(matches!(
                config.watch(Duration::from_millis(10)),
                Err(ConfigError::NoWatchableSources)
            ));
            assert!(matches!(
                config.watch(Duration::ZERO),
                Err(ConfigError::InvalidInterval(_))
            ));
        });
    }

    #[test]
    fn test_watch_outside_runtime() {
        let config = Config::new();
        config.add_source(FlakySource::default());
        assert!(matches!(
            config.watch(Duration::from_millis(10)),
            Err(ConfigError::NoRuntime)
        ));
        assert!(!config.is_watching());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let config = Config::new();
        config.add_source(FlakySource::default());
        config.watch(Duration::from_millis(10)).unwrap();
        assert!(config.is_watching());
        config.close();
        config.close();
        assert!(!config.is_watching());
    }
}
