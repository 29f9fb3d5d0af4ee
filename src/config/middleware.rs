//! Source decorators: caching, retry, templating and decryption.
//!
//! Every wrapper is itself a [`ConfigSource`] that keeps the inner source's
//! priority and watch paths, so wrappers compose freely.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::encryption::EncryptionProcessor;
use super::error::SourceError;
use super::source::ConfigSource;
use super::template::TemplateProcessor;
use super::value::Map;

/// Serves the last successful load until `ttl` has elapsed.
///
/// A failed refresh returns the error and leaves the cache untouched.
#[derive(Debug)]
pub struct CachedSource {
    inner: Box<dyn ConfigSource>,
    ttl: Duration,
    cache: Mutex<Option<(Map, Instant)>>,
}

impl CachedSource {
    pub fn new(inner: impl ConfigSource + 'static, ttl: Duration) -> Self {
        Self {
            inner: Box::new(inner),
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Drops the cached snapshot so the next load goes to the inner source.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }
}

impl ConfigSource for CachedSource {
    fn name(&self) -> String {
        format!("cached:{}", self.inner.name())
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        let mut cache = self.cache.lock();
        if let Some((data, loaded_at)) = cache.as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return Ok(data.clone());
            }
        }

        let data = self.inner.load()?;
        *cache = Some((data.clone(), Instant::now()));
        Ok(data)
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.inner.watch_paths()
    }
}

/// Retries a failing load, sleeping `backoff * attempt` between tries.
#[derive(Debug)]
pub struct RetrySource {
    inner: Box<dyn ConfigSource>,
    max_attempts: u32,
    backoff: Duration,
}

impl RetrySource {
    /// `max_attempts` is clamped to at least one.
    pub fn new(inner: impl ConfigSource + 'static, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner: Box::new(inner),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl ConfigSource for RetrySource {
    fn name(&self) -> String {
        format!("retry:{}", self.inner.name())
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        let mut attempt = 1;
        loop {
            match self.inner.load() {
                Ok(data) => return Ok(data),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(SourceError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => {
                    warn!(
                        source = %self.inner.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        "config source load failed: {}",
                        e
                    );
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
            }
        }
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.inner.watch_paths()
    }
}

/// Expands `{{ ... }}` templates in the inner source's values.
pub struct TemplateSource {
    inner: Box<dyn ConfigSource>,
    processor: Arc<TemplateProcessor>,
}

impl TemplateSource {
    pub fn new(inner: impl ConfigSource + 'static, processor: Arc<TemplateProcessor>) -> Self {
        Self {
            inner: Box::new(inner),
            processor,
        }
    }
}

impl fmt::Debug for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSource")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ConfigSource for TemplateSource {
    fn name(&self) -> String {
        format!("template:{}", self.inner.name())
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        let data = self.inner.load()?;
        self.processor.process(&data)
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.inner.watch_paths()
    }
}

/// Decrypts prefixed values in the inner source's snapshot.
#[derive(Debug)]
pub struct DecryptSource {
    inner: Box<dyn ConfigSource>,
    processor: EncryptionProcessor,
}

impl DecryptSource {
    pub fn new(inner: impl ConfigSource + 'static, processor: EncryptionProcessor) -> Self {
        Self {
            inner: Box::new(inner),
            processor,
        }
    }
}

impl ConfigSource for DecryptSource {
    fn name(&self) -> String {
        format!("encryption:{}", self.inner.name())
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn load(&self) -> Result<Map, SourceError> {
        let data = self.inner.load()?;
        self.processor.process(&data)
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.inner.watch_paths()
    }
}

/// A source transformer.
#[derive(Clone)]
pub enum Middleware {
    Cache(Duration),
    Retry { max_attempts: u32, backoff: Duration },
    Template(Arc<TemplateProcessor>),
    Decrypt(EncryptionProcessor),
    Custom(Arc<dyn Fn(Box<dyn ConfigSource>) -> Box<dyn ConfigSource> + Send + Sync>),
}

impl Middleware {
    /// Wraps with an arbitrary transformer.
    pub fn custom(
        f: impl Fn(Box<dyn ConfigSource>) -> Box<dyn ConfigSource> + Send + Sync + 'static,
    ) -> Self {
        Middleware::Custom(Arc::new(f))
    }

    pub fn apply(&self, source: Box<dyn ConfigSource>) -> Box<dyn ConfigSource> {
        debug!(source = %source.name(), middleware = ?self, "wrapping config source");
        match self {
            Middleware::Cache(ttl) => Box::new(CachedSource::new(source, *ttl)),
            Middleware::Retry {
                max_attempts,
                backoff,
            } => Box::new(RetrySource::new(source, *max_attempts, *backoff)),
            Middleware::Template(processor) => {
                Box::new(TemplateSource::new(source, processor.clone()))
            }
            Middleware::Decrypt(processor) => {
                Box::new(DecryptSource::new(source, processor.clone()))
            }
            Middleware::Custom(f) => f(source),
        }
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::Cache(ttl) => f.debug_tuple("Cache").field(ttl).finish(),
            Middleware::Retry {
                max_attempts,
                backoff,
            } => f
                .debug_struct("Retry")
                .field("max_attempts", max_attempts)
                .field("backoff", backoff)
                .finish(),
            Middleware::Template(_) => f.write_str("Template"),
            Middleware::Decrypt(_) => f.write_str("Decrypt"),
            Middleware::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Applies `middlewares` so that the first one listed is the outermost
/// wrapper.
pub fn chain(source: Box<dyn ConfigSource>, middlewares: &[Middleware]) -> Box<dyn ConfigSource> {
    middlewares
        .iter()
        .rev()
        .fold(source, |wrapped, middleware| middleware.apply(wrapped))
}
