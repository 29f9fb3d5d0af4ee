pub mod config;

pub use config::{
    Bindable, Config, ConfigBuilder, ConfigError, ConfigSource, EnvSource, Field, FileSource,
    GlobSource, Map, MemorySource, Middleware, Rule, Value,
};
