//! Uniform construction of the built-in sources.

use std::path::Path;

use super::env::EnvSource;
use super::file::{DecoderRegistry, FileSource};
use super::glob::{is_glob, GlobSource};
use super::source::{
    ConfigSource, MemorySource, DEFAULT_ENV_PRIORITY, DEFAULT_FILE_PRIORITY,
    DEFAULT_GLOB_PRIORITY, DEFAULT_MEMORY_PRIORITY,
};
use super::value::Map;

/// Creates sources with a shared priority policy and decoder registry.
///
/// With no explicit priority each kind uses its own default (memory 0,
/// file and glob 10, env 20). [`SourceFactory::new`] pins every created
/// source to one priority, leaving registration order to decide conflicts.
#[derive(Debug, Clone, Default)]
pub struct SourceFactory {
    priority: Option<i32>,
    decoders: DecoderRegistry,
}

impl SourceFactory {
    pub fn new(default_priority: i32) -> Self {
        Self {
            priority: Some(default_priority),
            decoders: DecoderRegistry::new(),
        }
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn default_priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn decoders(&self) -> &DecoderRegistry {
        &self.decoders
    }

    pub(crate) fn decoders_mut(&mut self) -> &mut DecoderRegistry {
        &mut self.decoders
    }

    fn priority_or(&self, fallback: i32) -> i32 {
        self.priority.unwrap_or(fallback)
    }

    pub fn create_memory(&self, data: Map) -> MemorySource {
        MemorySource::with_priority(data, self.priority_or(DEFAULT_MEMORY_PRIORITY))
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> FileSource {
        FileSource::with_priority(path, self.priority_or(DEFAULT_FILE_PRIORITY))
            .with_decoders(self.decoders.clone())
    }

    pub fn create_optional_file(&self, path: impl AsRef<Path>) -> FileSource {
        self.create_file(path).required(false)
    }

    pub fn create_env(&self, prefix: impl Into<String>) -> EnvSource {
        EnvSource::with_priority(prefix, self.priority_or(DEFAULT_ENV_PRIORITY))
    }

    pub fn create_glob(&self, pattern: impl Into<String>) -> GlobSource {
        GlobSource::with_priority(pattern, self.priority_or(DEFAULT_GLOB_PRIORITY))
            .with_decoders(self.decoders.clone())
    }

    /// Creates a source from a kind name: `memory`, `file`, `env` or `glob`.
    ///
    /// Any other kind is detected from `path`: empty means memory (from
    /// `data`), a glob metacharacter means glob, anything else a file. For
    /// `env`, `path` is the variable prefix.
    pub fn create_from_type(&self, kind: &str, path: &str, data: Map) -> Box<dyn ConfigSource> {
        match kind {
            "memory" => Box::new(self.create_memory(data)),
            "file" => Box::new(self.create_file(path)),
            "env" => Box::new(self.create_env(path)),
            "glob" => Box::new(self.create_glob(path)),
            _ if path.is_empty() => Box::new(self.create_memory(data)),
            _ if is_glob(path) => Box::new(self.create_glob(path)),
            _ => Box::new(self.create_file(path)),
        }
    }
}
