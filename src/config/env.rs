//! Environment variable source and key transforms.

use std::fmt;
use std::sync::Arc;

use super::error::SourceError;
use super::source::{ConfigSource, DEFAULT_ENV_PRIORITY};
use super::value::{Map, Value};

/// Maps a (prefix-stripped) variable name to a config key.
pub type KeyTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Common key transforms.
pub mod transforms {
    pub fn lower(key: &str) -> String {
        key.to_lowercase()
    }

    pub fn upper(key: &str) -> String {
        key.to_uppercase()
    }

    pub fn dot_to_underscore(key: &str) -> String {
        key.replace('.', "_")
    }

    /// `DATABASE_HOST` becomes `database.host`.
    pub fn underscore_to_dot(key: &str) -> String {
        key.replace('_', ".").to_lowercase()
    }

    /// `maxConns` becomes `max_conns`.
    pub fn camel_to_snake(key: &str) -> String {
        let mut out = String::with_capacity(key.len() + 4);
        for (i, ch) in key.chars().enumerate() {
            if i > 0 && ch.is_ascii_uppercase() {
                out.push('_');
            }
            out.push(ch);
        }
        out.to_lowercase()
    }
}

/// Reads process environment variables.
///
/// Variables are filtered by a case-sensitive prefix, the prefix is removed,
/// and the remainder is passed through the key transform
/// ([`transforms::underscore_to_dot`] by default). Values stay strings.
#[derive(Clone)]
pub struct EnvSource {
    prefix: String,
    priority: i32,
    transform: KeyTransform,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_priority(prefix, DEFAULT_ENV_PRIORITY)
    }

    pub fn with_priority(prefix: impl Into<String>, priority: i32) -> Self {
        Self {
            prefix: prefix.into(),
            priority,
            transform: Arc::new(transforms::underscore_to_dot),
        }
    }

    pub fn with_key_transform(mut self, transform: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Applies prefix filtering and the key transform to `vars`.
    pub fn collect<I>(&self, vars: I) -> Map
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries = Map::new();
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            if stripped.is_empty() {
                continue;
            }
            entries.insert((self.transform)(stripped), Value::String(value));
        }
        entries
    }
}

impl fmt::Debug for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSource")
            .field("prefix", &self.prefix)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl ConfigSource for EnvSource {
    fn name(&self) -> String {
        "env".to_string()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&self) -> Result<Map, SourceError> {
        // `std::env::vars` panics on non-UTF-8 pairs; skip them instead.
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        Ok(self.collect(vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_is_stripped_and_key_transformed() {
        let source = EnvSource::new("APP_");
        let entries = source.collect(vars(&[
            ("APP_DATABASE_HOST", "db.local"),
            ("APP_PORT", "8080"),
            ("OTHER_VAR", "x"),
        ]));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries["database.host"], Value::from("db.local"));
        assert_eq!(entries["port"], Value::from("8080"));
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        let source = EnvSource::new("APP_");
        assert!(source.collect(vars(&[("app_port", "1")])).is_empty());
    }

    #[test]
    fn test_empty_prefix_takes_everything() {
        let source = EnvSource::new("");
        let entries = source.collect(vars(&[("HOME", "/root"), ("LOG_LEVEL", "debug")]));
        assert_eq!(entries["home"], Value::from("/root"));
        assert_eq!(entries["log.level"], Value::from("debug"));
    }

    #[test]
    fn test_custom_key_transform() {
        let source = EnvSource::new("SVC__").with_key_transform(|k| k.replace("__", ".").to_lowercase());
        let entries = source.collect(vars(&[("SVC__HTTP_SERVER__PORT", "80")]));
        assert_eq!(entries["http_server.port"], Value::from("80"));
    }

    #[test]
    fn test_load_reads_process_environment() {
        std::env::set_var("LAYERCONF_ENV_TEST_LOAD_KEY", "present");
        let data = EnvSource::new("LAYERCONF_ENV_TEST_").load().unwrap();
        assert_eq!(data["load.key"], Value::from("present"));
    }

    #[test]
    fn test_transforms() {
        assert_eq!(transforms::camel_to_snake("maxConns"), "max_conns");
        assert_eq!(transforms::dot_to_underscore("a.b"), "a_b");
        assert_eq!(transforms::upper("a"), "A");
        assert_eq!(transforms::lower("A"), "a");
    }
}
