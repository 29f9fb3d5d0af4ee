use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single configuration source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode {format} file '{path}': {message}")]
    Decode {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("failed to load '{path}': {source}")]
    GlobFile {
        path: PathBuf,
        #[source]
        source: Box<SourceError>,
    },

    #[error("composite source {name}: {source}")]
    Composite {
        name: String,
        #[source]
        source: Box<SourceError>,
    },

    #[error("failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<SourceError>,
    },

    #[error("template expansion failed for key '{key}': {source}")]
    Template {
        key: String,
        #[source]
        source: TemplateError,
    },

    #[error("decryption failed for key '{key}': {source}")]
    Decrypt {
        key: String,
        #[source]
        source: DecryptError,
    },

    #[error("{0}")]
    Other(String),
}

/// Failure while expanding a `{{ ... }}` template.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("unclosed template action (missing '}}}}')")]
    Unclosed,

    #[error("variable not found: {0}")]
    MissingVariable(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("function {name}: {message}")]
    Function { name: String, message: String },
}

/// Failure while decrypting an `ENC:` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecryptError {
    #[error("decoding base64: {0}")]
    Encoding(String),

    #[error("ciphertext too short")]
    TooShort,

    #[error("authentication failed")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    Utf8,

    #[error("encryption failed")]
    Encrypt,
}

/// A value that could not be converted to the requested type.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ConvertError {
    #[error("unsupported type conversion: from {from} to {to}")]
    Unsupported { from: &'static str, to: &'static str },

    #[error("cannot convert '{value}' to {to}: {reason}")]
    Invalid {
        value: String,
        to: &'static str,
        reason: String,
    },

    #[error("value {value} out of range for {to}")]
    OutOfRange { value: String, to: &'static str },

    #[error(transparent)]
    Bind(Box<BindError>),
}

impl ConvertError {
    pub(crate) fn invalid(value: impl fmt::Display, to: &'static str, reason: impl fmt::Display) -> Self {
        ConvertError::Invalid {
            value: value.to_string(),
            to,
            reason: reason.to_string(),
        }
    }
}

/// Failure while projecting the key space onto a typed destination.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum BindError {
    #[error("unknown config field {field:?} on {target}")]
    UnknownField { field: String, target: &'static str },

    #[error("bind {key:?}: {source}")]
    Convert {
        key: String,
        #[source]
        source: ConvertError,
    },

    #[error("bind {key:?}: sequence index {index} exceeds the limit of {max}")]
    IndexOutOfRange {
        key: String,
        index: String,
        max: usize,
    },

    #[error("cannot bind {found} to {target}: expected a map")]
    NotAnObject {
        found: &'static str,
        target: &'static str,
    },
}

/// Per-key validation failures, collected into one error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    /// Field to message mapping.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub(crate) fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("configuration validation failed: ")?;
        for (i, (field, message)) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Hook phases, used to label hook failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreLoad,
    PostLoad,
    PreBind,
    PostBind,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::PreLoad => f.write_str("pre-load"),
            HookPhase::PostLoad => f.write_str("post-load"),
            HookPhase::PreBind => f.write_str("pre-bind"),
            HookPhase::PostBind => f.write_str("post-bind"),
        }
    }
}

/// Top-level error returned by the configuration engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("source `{name}`: {source}")]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },

    #[error("{phase} hook {hook}: {source}")]
    Hook {
        phase: HookPhase,
        hook: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("no watchable sources configured")]
    NoWatchableSources,

    #[error("watching requires a running Tokio runtime")]
    NoRuntime,

    #[error("profile {0:?} does not exist")]
    ProfileNotFound(String),

    #[error("invalid watch interval {0:?}")]
    InvalidInterval(Duration),

    #[error("failed to deserialize config: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error(transparent)]
    Encryption(#[from] DecryptError),
}

impl ConfigError {
    /// Field-to-message map when this is a validation failure.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            ConfigError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
