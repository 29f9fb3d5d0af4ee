use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::convert::{Kind, Target};
use super::encryption::EncryptionProcessor;
use super::engine::Config;
use super::env::EnvSource;
use super::error::{ConfigError, ConvertError};
use super::factory::SourceFactory;
use super::file::Decoder;
use super::hooks::{DefaultsHook, Hook, HookError, LoggingHook, Observer, ValidationHook};
use super::middleware::{chain, Middleware};
use super::rules::Rule;
use super::source::{CompositeSource, ConditionalSource, ConfigSource};
use super::template::TemplateProcessor;
use super::value::{Map, Value};

/// Builder for a [`Config`] assembled from several sources.
///
/// Sources are ordered by priority, not by registration: with the default
/// priorities memory loads first, then files and globs, then the
/// environment. Equal priorities keep registration order, so
/// [`with_default_priority`](Self::with_default_priority) turns the builder
/// into a plain "later overrides earlier" stack.
///
/// Middleware registered with [`with_middleware`](Self::with_middleware) and
/// its shorthands wraps every source added after it, the first one
/// registered ending up outermost.
///
/// ## Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use layerconf::{Config, Rule};
///
/// let config = Config::builder()
///     .with_file("config/default.yaml")
///     .with_optional_file("config/local.yaml")
///     .with_env("MYAPP_")
///     .with_rule(Rule::required("database.host"))
///     .build_and_load()?;
///
/// let host = config.get_string_or("database.host", "localhost");
/// # Ok::<(), layerconf::ConfigError>(())
/// ```
///
/// Clones share the configuration under construction but keep their own
/// middleware list and priority policy, which makes branching easy:
///
/// ```no_run
/// # use std::time::Duration;
/// # use layerconf::Config;
/// let base = Config::builder().with_file("config/default.yaml");
/// let cached = base.clone().with_caching(Duration::from_secs(60));
/// # let _ = cached;
/// ```
#[derive(Clone)]
#[must_use = "builders do nothing until .build() is called"]
pub struct ConfigBuilder {
    config: Config,
    factory: SourceFactory,
    middleware: Vec<Middleware>,
    active_profile: Option<String>,
}

impl ConfigBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            config: Config::new(),
            factory: SourceFactory::default(),
            middleware: Vec::new(),
            active_profile: None,
        }
    }

    /// Local development: `config.dev.yaml`, `DEV_` variables and template
    /// expansion.
    pub fn development() -> Self {
        Self::new()
            .with_default_priority(10)
            .with_template_processing()
            .with_optional_file("config.dev.yaml")
            .with_env("DEV_")
    }

    /// Production: `/etc/app/config.yaml` and `APP_` variables behind a
    /// five minute cache and three retries.
    pub fn production() -> Self {
        Self::new()
            .with_default_priority(10)
            .with_caching(Duration::from_secs(5 * 60))
            .with_retry(3, Duration::from_secs(1))
            .with_file("/etc/app/config.yaml")
            .with_env("APP_")
    }

    /// Tests: a single in-memory `env = "test"` entry.
    pub fn testing() -> Self {
        Self::new().with_memory(Map::from([("env".to_string(), Value::from("test"))]))
    }

    /// Pins every source created by this builder to `priority`.
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        let decoders = self.factory.decoders().clone();
        self.factory = SourceFactory::new(priority).with_decoders(decoders);
        self
    }

    /// Adds a file decoder used by file and glob sources added afterwards.
    pub fn register_decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.factory.decoders_mut().register(decoder);
        self
    }

    /// Wraps every subsequently added source in `middleware`.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Expands `{{ ... }}` templates in subsequently added sources.
    pub fn with_template_processing(self) -> Self {
        let processor = self.config.template_processor();
        self.with_middleware(Middleware::Template(processor))
    }

    /// Decrypts `ENC:` values in subsequently added sources with a key
    /// derived from `passphrase`.
    pub fn with_encryption(self, passphrase: &str) -> Self {
        self.with_encryption_processor(EncryptionProcessor::with_passphrase(passphrase))
    }

    pub fn with_encryption_processor(self, processor: EncryptionProcessor) -> Self {
        self.config.set_encryption_processor(processor.clone());
        self.with_middleware(Middleware::Decrypt(processor))
    }

    pub fn with_caching(self, ttl: Duration) -> Self {
        self.with_middleware(Middleware::Cache(ttl))
    }

    pub fn with_retry(self, max_attempts: u32, backoff: Duration) -> Self {
        self.with_middleware(Middleware::Retry {
            max_attempts,
            backoff,
        })
    }

    /// Adds any source, wrapped in the registered middleware.
    pub fn with_source(self, source: impl ConfigSource + 'static) -> Self {
        self.with_boxed_source(Box::new(source))
    }

    /// Adds a source wrapped only in `middlewares`.
    pub fn with_source_and_middleware(
        self,
        source: impl ConfigSource + 'static,
        middlewares: &[Middleware],
    ) -> Self {
        self.config.add_source_with_middleware(source, middlewares);
        self
    }

    fn with_boxed_source(self, source: Box<dyn ConfigSource>) -> Self {
        self.config
            .add_boxed_source(chain(source, &self.middleware));
        self
    }

    pub fn with_memory(self, data: Map) -> Self {
        let source = self.factory.create_memory(data);
        self.with_source(source)
    }

    /// Adds a required file; its format follows the extension.
    pub fn with_file(self, path: impl AsRef<Path>) -> Self {
        let source = self.factory.create_file(path);
        self.with_source(source)
    }

    /// Adds a file that loads as empty when missing.
    pub fn with_optional_file(self, path: impl AsRef<Path>) -> Self {
        let source = self.factory.create_optional_file(path);
        self.with_source(source)
    }

    /// Adds several required files, each as its own source.
    pub fn with_files<P: AsRef<Path>>(self, paths: impl IntoIterator<Item = P>) -> Self {
        paths
            .into_iter()
            .fold(self, |builder, path| builder.with_file(path))
    }

    /// Adds the variables starting with `prefix`. `APP_DB_HOST` with prefix
    /// `APP_` becomes `db.host`.
    pub fn with_env(self, prefix: impl Into<String>) -> Self {
        let source = self.factory.create_env(prefix);
        self.with_source(source)
    }

    /// Like [`with_env`](Self::with_env) with a custom key transform.
    pub fn with_env_transform(
        self,
        prefix: impl Into<String>,
        transform: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        let source: EnvSource = self.factory.create_env(prefix).with_key_transform(transform);
        self.with_source(source)
    }

    /// Adds every file matching `pattern`.
    pub fn with_glob(self, pattern: impl Into<String>) -> Self {
        let source = self.factory.create_glob(pattern);
        self.with_source(source)
    }

    pub fn with_composite(
        self,
        name: impl Into<String>,
        priority: i32,
        sources: Vec<Box<dyn ConfigSource>>,
    ) -> Self {
        self.with_source(CompositeSource::new(name, priority, sources))
    }

    /// Adds `source` gated by `condition`, evaluated on every load.
    pub fn with_conditional(
        self,
        source: impl ConfigSource + 'static,
        condition: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.with_source(ConditionalSource::new(source, condition))
    }

    pub fn with_rule(self, rule: Rule) -> Self {
        self.config.add_rules([rule]);
        self
    }

    pub fn with_rules(self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.config.add_rules(rules);
        self
    }

    /// Adds a raw rule expression such as `required,min=1`.
    pub fn with_rule_expression(
        self,
        key: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.config.add_rule(key, expression);
        self
    }

    pub fn with_validator(
        self,
        tag: impl Into<String>,
        validator: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.config.register_validator(tag, validator);
        self
    }

    pub fn with_hook(self, hook: impl Hook + 'static) -> Self {
        self.config.register_hook(hook);
        self
    }

    pub fn with_logging_hook(self) -> Self {
        self.with_hook(LoggingHook)
    }

    pub fn with_validation_hook(
        self,
        check: impl Fn(&Map) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.with_hook(ValidationHook::new(check))
    }

    /// Fills keys that no source provides.
    pub fn with_defaults(self, defaults: Map) -> Self {
        self.with_hook(DefaultsHook::new(defaults))
    }

    pub fn with_observer(self, observer: impl Observer + 'static) -> Self {
        self.config.observe(observer);
        self
    }

    pub fn with_profile(self, name: impl Into<String>, data: Map) -> Self {
        self.config.add_profile(name, data);
        self
    }

    /// Activates a profile when the configuration is built.
    pub fn with_active_profile(mut self, name: impl Into<String>) -> Self {
        self.active_profile = Some(name.into());
        self
    }

    pub fn with_template_function(
        self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.config.add_template_function(name, function);
        self
    }

    /// Registers a converter for exactly `T`.
    pub fn with_converter<T: Send + 'static>(
        self,
        converter: impl Fn(&Value) -> Result<T, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        self.config.register_converter(converter);
        self
    }

    /// Replaces the normalizing converter for every destination of `kind`.
    pub fn with_kind_converter(
        self,
        kind: Kind,
        converter: impl Fn(&Value, &Target) -> Result<Value, ConvertError> + Send + Sync + 'static,
    ) -> Self {
        self.config.register_kind_converter(kind, converter);
        self
    }

    /// The template processor shared by this builder's template middleware.
    pub fn template_processor(&self) -> Arc<TemplateProcessor> {
        self.config.template_processor()
    }

    /// Runs `f` on the builder, for reusable groups of settings.
    pub fn apply(self, f: impl FnOnce(Self) -> Self) -> Self {
        f(self)
    }

    pub fn apply_if(self, condition: bool, f: impl FnOnce(Self) -> Self) -> Self {
        if condition {
            f(self)
        } else {
            self
        }
    }

    /// Returns the configuration without loading it.
    ///
    /// Fails only when the requested active profile was never registered.
    pub fn build(self) -> Result<Config, ConfigError> {
        if let Some(name) = &self.active_profile {
            self.config.state().write().activate_profile(name)?;
        }
        Ok(self.config)
    }

    /// Builds and loads.
    pub fn build_and_load(self) -> Result<Config, ConfigError> {
        let config = self.build()?;
        config.load()?;
        Ok(config)
    }

    /// Builds, loads and starts the watch loop. Must run inside a Tokio
    /// runtime.
    pub fn build_and_watch(self, interval: Duration) -> Result<Config, ConfigError> {
        let config = self.build_and_load()?;
        config.watch(interval)?;
        Ok(config)
    }

    /// Builds and loads.
    ///
    /// # Panics
    ///
    /// Panics if loading or validation fails.
    pub fn must_build(self) -> Config {
        match self.build_and_load() {
            Ok(config) => config,
            Err(e) => panic!("failed to build configuration: {e}"),
        }
    }

    /// # Panics
    ///
    /// Panics if loading, validation or starting the watch loop fails.
    pub fn must_build_and_watch(self, interval: Duration) -> Config {
        match self.build_and_watch(interval) {
            Ok(config) => config,
            Err(e) => panic!("failed to build configuration: {e}"),
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("config", &self.config)
            .field("factory", &self.factory)
            .field("middleware", &self.middleware)
            .field("active_profile", &self.active_profile)
            .finish()
    }
}
