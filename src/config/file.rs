//! File-based configuration source.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::SourceError;
use super::flat::flatten;
use super::source::{ConfigSource, DEFAULT_FILE_PRIORITY};
use super::value::{Map, Value};

/// Turns raw file bytes into a nested map.
pub trait Decoder: Send + Sync {
    /// Format name used in error messages.
    fn format(&self) -> &'static str;

    /// Lowercase extensions without the dot.
    fn extensions(&self) -> &[&'static str];

    fn decode(&self, bytes: &[u8]) -> Result<Map, String>;
}

#[derive(Debug, Clone, Copy)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn format(&self) -> &'static str {
        "JSON"
    }

    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map, String> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        into_map(Value::from(value))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct YamlDecoder;

impl Decoder for YamlDecoder {
    fn format(&self) -> &'static str {
        "YAML"
    }

    fn extensions(&self) -> &[&'static str] {
        &["yaml", "yml"]
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map, String> {
        let value: serde_yaml::Value = serde_yaml::from_slice(bytes).map_err(|e| e.to_string())?;
        into_map(Value::from(value))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TomlDecoder;

impl Decoder for TomlDecoder {
    fn format(&self) -> &'static str {
        "TOML"
    }

    fn extensions(&self) -> &[&'static str] {
        &["toml"]
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
        let table: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
        into_map(Value::from(toml::Value::Table(table)))
    }
}

fn into_map(value: Value) -> Result<Map, String> {
    match value {
        Value::Map(map) => Ok(map),
        // An empty YAML document decodes to null.
        Value::Null => Ok(Map::new()),
        other => Err(format!("expected a map at the top level, found {}", other.type_name())),
    }
}

/// Decoders keyed by file extension.
///
/// Unknown extensions fall back to JSON.
#[derive(Clone)]
pub struct DecoderRegistry {
    by_extension: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// JSON, YAML and TOML.
    pub fn new() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
        };
        registry.register(JsonDecoder);
        registry.register(YamlDecoder);
        registry.register(TomlDecoder);
        registry
    }

    /// Registers a decoder for all of its extensions, replacing previous ones.
    pub fn register(&mut self, decoder: impl Decoder + 'static) {
        let decoder: Arc<dyn Decoder> = Arc::new(decoder);
        for ext in decoder.extensions() {
            self.by_extension
                .insert(ext.to_ascii_lowercase(), decoder.clone());
        }
    }

    pub fn for_path(&self, path: &Path) -> Arc<dyn Decoder> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        self.by_extension
            .get(&ext)
            .cloned()
            .unwrap_or_else(|| Arc::new(JsonDecoder))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut extensions: Vec<_> = self.by_extension.keys().collect();
        extensions.sort();
        f.debug_struct("DecoderRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

/// A configuration source that loads from a single file.
///
/// Files can be marked as required or optional. Required files that don't
/// exist cause an error; optional files that don't exist load as empty.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    priority: i32,
    required: bool,
    decoders: DecoderRegistry,
}

impl FileSource {
    /// Creates a required file source at the default file priority.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_priority(path, DEFAULT_FILE_PRIORITY)
    }

    pub fn with_priority(path: impl AsRef<Path>, priority: i32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            priority,
            required: true,
            decoders: DecoderRegistry::new(),
        }
    }

    /// Creates a source that loads as empty when the file doesn't exist.
    pub fn optional(path: impl AsRef<Path>) -> Self {
        Self::new(path).required(false)
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn load(&self) -> Result<Map, SourceError> {
        match load_config_file(&self.path, self.required, &self.decoders)? {
            Some(tree) => Ok(flatten(tree)),
            None => Ok(Map::new()),
        }
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

/// Reads and decodes a config file.
///
/// Returns `Ok(None)` if the file doesn't exist and `required` is false.
fn load_config_file(
    path: &Path,
    required: bool,
    decoders: &DecoderRegistry,
) -> Result<Option<Map>, SourceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => return Ok(None),
        Err(e) => {
            return Err(SourceError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let decoder = decoders.for_path(path);
    decoder
        .decode(&bytes)
        .map(Some)
        .map_err(|message| SourceError::Decode {
            path: path.to_path_buf(),
            format: decoder.format(),
            message,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_file_source_loads_yaml_flattened() {
        let file = temp_file(".yaml", "server:\n  host: localhost\n  port: 8080\nhosts: [a, b]\n");
        let source = FileSource::new(file.path());
        let data = source.load().unwrap();

        assert_eq!(data["server.host"], Value::from("localhost"));
        assert_eq!(data["server.port"], Value::Int(8080));
        assert_eq!(data["hosts"], Value::from("a,b"));
        assert_eq!(data["hosts.1"], Value::from("b"));
        assert_eq!(source.watch_paths(), vec![file.path().to_path_buf()]);
    }

    #[test]
    fn test_file_source_loads_json_and_toml() {
        let json = temp_file(".json", r#"{"db": {"port": 5432}}"#);
        assert_eq!(
            FileSource::new(json.path()).load().unwrap()["db.port"],
            Value::Int(5432)
        );

        let toml = temp_file(".toml", "[db]\nname = \"app\"\n");
        assert_eq!(
            FileSource::new(toml.path()).load().unwrap()["db.name"],
            Value::from("app")
        );
    }

    #[test]
    fn test_unknown_extension_falls_back_to_json() {
        let file = temp_file(".conf", r#"{"a": true}"#);
        assert_eq!(FileSource::new(file.path()).load().unwrap()["a"], Value::Bool(true));
    }

    #[test]
    fn test_file_source_required_missing() {
        let source = FileSource::new("/nonexistent/path/config.yaml");
        let result = source.load();

        assert!(matches!(result, Err(SourceError::Read { .. })));
    }

    #[test]
    fn test_file_source_optional_missing() {
        let source = FileSource::optional("/nonexistent/path/config.yaml");
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_source_malformed() {
        let file = temp_file(".json", "{not json");
        let err = FileSource::new(file.path()).load().unwrap_err();
        assert!(matches!(err, SourceError::Decode { format: "JSON", .. }));
    }

    #[test]
    fn test_registered_decoder_is_used() {
        struct KeyValueDecoder;

        impl Decoder for KeyValueDecoder {
            fn format(&self) -> &'static str {
                "key=value"
            }

            fn extensions(&self) -> &[&'static str] {
                &["kv"]
            }

            fn decode(&self, bytes: &[u8]) -> Result<Map, String> {
                let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
                Ok(text
                    .lines()
                    .filter_map(|line| line.split_once('='))
                    .map(|(k, v)| (k.trim().to_string(), Value::from(v.trim())))
                    .collect())
            }
        }

        let mut decoders = DecoderRegistry::new();
        decoders.register(KeyValueDecoder);

        let file = temp_file(".kv", "name = demo\n");
        let source = FileSource::new(file.path()).with_decoders(decoders);
        assert_eq!(source.load().unwrap()["name"], Value::from("demo"));
    }
}
