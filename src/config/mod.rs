//! Configuration loading and management.
//!
//! A [`Config`] merges any number of [`ConfigSource`]s into one flat key
//! space whose keys are dot paths (`database.host`, `servers.0.port`).
//! Sources are merged in ascending priority order, so higher priorities win.
//! Sources can be decorated with [`Middleware`] (caching, retries, template
//! expansion, decryption), observed for changes, validated with per-key
//! [`Rule`]s and bound onto typed values, either through [`Bindable`]
//! descriptors or through serde with [`Config::extract`].

mod bind;
mod builder;
mod convert;
mod encryption;
mod engine;
mod env;
mod error;
mod extract;
mod factory;
mod file;
mod flat;
mod glob;
mod hooks;
mod middleware;
mod profiles;
pub mod rules;
mod source;
mod template;
mod value;

pub use bind::{bind_map, Bindable, Descriptor, Field, MAX_SEQ_LEN};
pub use builder::ConfigBuilder;
pub use convert::{parse_duration, Convertible, ConverterRegistry, Kind, Target};
pub use encryption::{AesEncryptor, EncryptionProcessor, Encryptor, DEFAULT_PREFIX};
pub use engine::Config;
pub use env::{transforms, EnvSource, KeyTransform};
pub use error::{
    BindError, ConfigError, ConvertError, DecryptError, HookPhase, SourceError, TemplateError,
    ValidationErrors,
};
pub use factory::SourceFactory;
pub use file::{Decoder, DecoderRegistry, FileSource, JsonDecoder, TomlDecoder, YamlDecoder};
pub use flat::{deep_merge, diff, flatten};
pub use glob::GlobSource;
pub use hooks::{
    DefaultsHook, Hook, HookError, HookManager, LoadContext, LoggingHook, Observer,
    ValidationHook,
};
pub use middleware::{
    chain, CachedSource, DecryptSource, Middleware, RetrySource, TemplateSource,
};
pub use profiles::PROFILE_PRIORITY;
pub use rules::{Rule, ValidatorFn, ValidatorRegistry};
pub use source::{
    CompositeSource, ConditionalSource, ConfigSource, MemorySource, DEFAULT_ENV_PRIORITY,
    DEFAULT_FILE_PRIORITY, DEFAULT_GLOB_PRIORITY, DEFAULT_MEMORY_PRIORITY,
};
pub use template::{is_template, TemplateFn, TemplateProcessor};
pub use value::{Map, Value};
