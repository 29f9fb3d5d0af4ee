//! Per-key validation rules.
//!
//! A rule is a comma-separated tag expression such as `required,min=1,max=65535`.
//! Rules validate keys of the merged key space directly and do not need a
//! bound destination.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::value::Value;

pub const TAG_REQUIRED: &str = "required";
pub const TAG_OMIT_EMPTY: &str = "omitempty";
pub const TAG_MIN: &str = "min";
pub const TAG_MAX: &str = "max";
pub const TAG_GT: &str = "gt";
pub const TAG_LT: &str = "lt";
pub const TAG_GTE: &str = "gte";
pub const TAG_LTE: &str = "lte";
pub const TAG_EQ: &str = "eq";
pub const TAG_NE: &str = "ne";
pub const TAG_EMAIL: &str = "email";
pub const TAG_URL: &str = "url";
pub const TAG_UUID: &str = "uuid";
pub const TAG_UUID4: &str = "uuid4";
pub const TAG_LEN: &str = "len";
pub const TAG_ONE_OF: &str = "oneof";
pub const TAG_REGEXP: &str = "regexp";

/// Commas inside a parameter are written as this escape.
const COMMA_ESCAPE: &str = "0x2C";

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("valid email regex")
});

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid uuid regex")
});

static UUID4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("valid uuid4 regex")
});

/// A chainable rule for one key.
///
/// ```
/// use layerconf::Rule;
///
/// let rule = Rule::required("server.port").add("min", "1").add("max", "65535");
/// assert_eq!(rule.expression(), "required,min=1,max=65535");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    key: String,
    tags: Vec<String>,
}

impl Rule {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            tags: Vec::new(),
        }
    }

    /// Appends `tag`, or `tag=param` when `param` is non-empty.
    pub fn add(mut self, tag: &str, param: &str) -> Self {
        if param.is_empty() {
            self.tags.push(tag.to_string());
        } else {
            self.tags.push(format!("{tag}={}", param.replace(',', COMMA_ESCAPE)));
        }
        self
    }

    pub fn required(key: impl Into<String>) -> Self {
        Self::new(key).add(TAG_REQUIRED, "")
    }

    pub fn range(key: impl Into<String>, min: i64, max: i64) -> Self {
        Self::new(key)
            .add(TAG_MIN, &min.to_string())
            .add(TAG_MAX, &max.to_string())
    }

    pub fn min(key: impl Into<String>, min: i64) -> Self {
        Self::new(key).add(TAG_MIN, &min.to_string())
    }

    pub fn max(key: impl Into<String>, max: i64) -> Self {
        Self::new(key).add(TAG_MAX, &max.to_string())
    }

    pub fn email(key: impl Into<String>) -> Self {
        Self::new(key).add(TAG_EMAIL, "")
    }

    pub fn url(key: impl Into<String>) -> Self {
        Self::new(key).add(TAG_URL, "")
    }

    pub fn uuid(key: impl Into<String>) -> Self {
        Self::new(key).add(TAG_UUID, "")
    }

    pub fn uuid4(key: impl Into<String>) -> Self {
        Self::new(key).add(TAG_UUID4, "")
    }

    pub fn len(key: impl Into<String>, length: usize) -> Self {
        Self::new(key).add(TAG_LEN, &length.to_string())
    }

    pub fn one_of(key: impl Into<String>, values: &[&str]) -> Self {
        Self::new(key).add(TAG_ONE_OF, &values.join(" "))
    }

    pub fn pattern(key: impl Into<String>, pattern: &str) -> Self {
        Self::new(key).add(TAG_REGEXP, pattern)
    }

    pub fn gt(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_GT, &value.to_string())
    }

    pub fn lt(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_LT, &value.to_string())
    }

    pub fn gte(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_GTE, &value.to_string())
    }

    pub fn lte(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_LTE, &value.to_string())
    }

    pub fn eq(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_EQ, &value.to_string())
    }

    pub fn ne(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::new(key).add(TAG_NE, &value.to_string())
    }

    /// Any registered tag, built-in or custom.
    pub fn tag(key: impl Into<String>, tag: &str, param: &str) -> Self {
        Self::new(key).add(tag, param)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expression(&self) -> String {
        self.tags.join(",")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

/// True when a rule expression contains the `required` tag.
pub fn is_required(expression: &str) -> bool {
    parse(expression).any(|(tag, _)| tag == TAG_REQUIRED)
}

fn parse(expression: &str) -> impl Iterator<Item = (&str, String)> {
    expression
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((tag, param)) => (tag.trim(), param.replace(COMMA_ESCAPE, ",")),
            None => (part, String::new()),
        })
}

/// A custom validator: receives the value and the tag parameter.
pub type ValidatorFn = Arc<dyn Fn(&Value, &str) -> bool + Send + Sync>;

/// Evaluates rule expressions; custom tags take precedence over built-ins.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    custom: HashMap<String, ValidatorFn>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: impl Into<String>,
        validator: impl Fn(&Value, &str) -> bool + Send + Sync + 'static,
    ) {
        self.custom.insert(tag.into(), Arc::new(validator));
    }

    /// Checks `value` against every tag of `expression`, returning the
    /// message for the first one that fails.
    pub fn check(&self, value: &Value, expression: &str) -> Result<(), String> {
        for (tag, param) in parse(expression) {
            if tag == TAG_OMIT_EMPTY {
                if is_zero(value) {
                    return Ok(());
                }
                continue;
            }

            let passed = match self.custom.get(tag) {
                Some(validator) => validator(value, &param),
                None => builtin(tag, value, &param)?,
            };
            if !passed {
                return Err(message(tag, &param));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.custom.keys().collect();
        tags.sort();
        f.debug_struct("ValidatorRegistry")
            .field("custom", &tags)
            .finish()
    }
}

fn message(tag: &str, param: &str) -> String {
    match tag {
        TAG_REQUIRED => "is required".to_string(),
        TAG_MIN => format!("must be >= {param}"),
        TAG_MAX => format!("must be <= {param}"),
        TAG_EMAIL => "must be a valid email".to_string(),
        TAG_URL => "must be a valid URL".to_string(),
        TAG_ONE_OF => format!("must be one of: {param}"),
        other => format!("validation failed: {other}"),
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Int(i) => *i == 0,
        Value::Float(x) => *x == 0.0,
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
    }
}

/// The number a comparison tag looks at: numeric values (and strings that
/// parse as numbers) compare by value; other strings and lists by length.
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::String(s) => Some(
            s.trim()
                .parse::<f64>()
                .unwrap_or_else(|_| s.chars().count() as f64),
        ),
        Value::List(items) => Some(items.len() as f64),
        Value::Map(map) => Some(map.len() as f64),
        Value::Bool(_) | Value::Null => None,
    }
}

fn length(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        other => measure(other),
    }
}

fn number_param(tag: &str, param: &str) -> Result<f64, String> {
    param
        .trim()
        .parse()
        .map_err(|_| format!("invalid parameter {param:?} for {tag}"))
}

fn compare(
    tag: &str,
    value: &Value,
    param: &str,
    measure: fn(&Value) -> Option<f64>,
    cmp: fn(f64, f64) -> bool,
) -> Result<bool, String> {
    let limit = number_param(tag, param)?;
    Ok(measure(value).is_some_and(|n| cmp(n, limit)))
}

fn equals(value: &Value, param: &str) -> bool {
    match (value, param.trim().parse::<f64>()) {
        (Value::Bool(b), _) => crate::config::convert::parse_bool(param) == Some(*b),
        (Value::String(s), Ok(p)) => s.trim().parse::<f64>().is_ok_and(|n| n == p),
        (Value::String(s), Err(_)) => s == param,
        (other, Ok(p)) => measure(other) == Some(p),
        (other, Err(_)) => other.to_string() == param,
    }
}

fn builtin(tag: &str, value: &Value, param: &str) -> Result<bool, String> {
    let text = || value.to_string();
    Ok(match tag {
        TAG_REQUIRED => !is_zero(value),
        TAG_MIN | TAG_GTE => compare(tag, value, param, measure, |n, p| n >= p)?,
        TAG_MAX | TAG_LTE => compare(tag, value, param, measure, |n, p| n <= p)?,
        TAG_GT => compare(tag, value, param, measure, |n, p| n > p)?,
        TAG_LT => compare(tag, value, param, measure, |n, p| n < p)?,
        TAG_LEN => compare(tag, value, param, length, |n, p| n == p)?,
        TAG_EQ => equals(value, param),
        TAG_NE => !equals(value, param),
        TAG_EMAIL => EMAIL.is_match(&text()),
        TAG_URL => Url::parse(&text()).is_ok(),
        TAG_UUID => UUID.is_match(&text()),
        TAG_UUID4 => UUID4.is_match(&text()),
        TAG_ONE_OF => {
            let text = text();
            param.split_whitespace().any(|option| option == text)
        }
        TAG_REGEXP => Regex::new(param)
            .map_err(|e| format!("invalid pattern {param:?}: {e}"))?
            .is_match(&text()),
        other => return Err(format!("unknown validation tag {other:?}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(value: impl Into<Value>, expression: &str) -> Result<(), String> {
        ValidatorRegistry::new().check(&value.into(), expression)
    }

    #[test]
    fn test_rule_builders() {
        assert_eq!(Rule::range("port", 1, 65535).expression(), "min=1,max=65535");
        assert_eq!(Rule::one_of("env", &["dev", "prod"]).expression(), "oneof=dev prod");
        assert_eq!(Rule::uuid4("id").expression(), "uuid4");
        assert_eq!(
            Rule::required("name").add(TAG_LEN, "3").to_string(),
            "required,len=3"
        );
        assert_eq!(Rule::gt("ratio", 0.5).expression(), "gt=0.5");
        assert_eq!(Rule::required("k").key(), "k");
    }

    #[test]
    fn test_required() {
        assert_eq!(check("", "required"), Err("is required".to_string()));
        assert_eq!(check(Value::Null, "required"), Err("is required".to_string()));
        assert!(check("x", "required").is_ok());
        assert!(is_required("min=1, required"));
        assert!(!is_required("min=1"));
    }

    #[test]
    fn test_numeric_bounds() {
        assert!(check(8080, "min=1,max=65535").is_ok());
        assert!(check("8080", "min=1,max=65535").is_ok());
        assert_eq!(check(0, "min=1"), Err("must be >= 1".to_string()));
        assert_eq!(check("70000", "max=65535"), Err("must be <= 65535".to_string()));
        assert!(check(2.5, "gt=2,lt=3").is_ok());
        assert!(check(3, "lt=3").is_err());
        assert!(check(3, "lte=3,gte=3").is_ok());
    }

    #[test]
    fn test_string_and_list_lengths() {
        assert!(check("abc", "min=2,max=3").is_ok());
        assert!(check("abcd", "max=3").is_err());
        assert!(check("8080", "len=4").is_ok());
        assert!(check(Value::List(vec![Value::Int(1)]), "min=1").is_ok());
        assert!(check(Value::List(vec![]), "min=1").is_err());
    }

    #[test]
    fn test_equality() {
        assert!(check("prod", "eq=prod").is_ok());
        assert!(check("8080", "eq=8080.0").is_ok());
        assert!(check(true, "eq=true").is_ok());
        assert_eq!(check("dev", "ne=dev"), Err("validation failed: ne".to_string()));
    }

    #[test]
    fn test_formats() {
        assert!(check("ops@example.com", "email").is_ok());
        assert_eq!(check("ops@", "email"), Err("must be a valid email".to_string()));
        assert!(check("https://example.com/x", "url").is_ok());
        assert_eq!(check("example.com", "url"), Err("must be a valid URL".to_string()));
        assert!(check("550e8400-e29b-41d4-a716-446655440000", "uuid4").is_ok());
        assert!(check("550e8400-e29b-11d4-a716-446655440000", "uuid4").is_err());
        assert!(check("550E8400-E29B-11D4-A716-446655440000", "uuid").is_ok());
    }

    #[test]
    fn test_one_of_and_pattern() {
        assert!(check("debug", "oneof=debug info warn").is_ok());
        assert_eq!(
            check("trace", "oneof=debug info"),
            Err("must be one of: debug info".to_string())
        );

        let rule = Rule::pattern("k", "^[a-z]{1,3}$");
        assert!(check("abc", &rule.expression()).is_ok());
        assert!(check("abcd", &rule.expression()).is_err());
    }

    #[test]
    fn test_omitempty_skips_zero_values() {
        assert!(check("", "omitempty,email").is_ok());
        assert!(check("nope", "omitempty,email").is_err());
    }

    #[test]
    fn test_unknown_tag_and_bad_parameter() {
        assert!(check("x", "shiny").unwrap_err().contains("unknown validation tag"));
        assert!(check(1, "min=abc").unwrap_err().contains("invalid parameter"));
    }

    #[test]
    fn test_custom_validator_overrides_builtin() {
        let mut registry = ValidatorRegistry::new();
        registry.register("even", |v, _| v.to_string().parse::<i64>().is_ok_and(|n| n % 2 == 0));
        registry.register(TAG_EMAIL, |_, _| true);

        assert!(registry.check(&Value::Int(4), "even").is_ok());
        assert_eq!(
            registry.check(&Value::Int(3), "even"),
            Err("validation failed: even".to_string())
        );
        assert!(registry.check(&Value::from("nope"), "email").is_ok());
    }
}
