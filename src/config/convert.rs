//! Type conversion registry.
//!
//! Conversion is two-tier. An exact-type converter registered for the
//! destination type wins outright. Otherwise the converter for the
//! destination's [`Kind`] normalizes the raw value into a canonical
//! [`Value`] shape, and the destination's [`Convertible`] impl builds itself
//! from that. Sequence and optional destinations convert their elements back
//! through the same registry, so custom converters apply at every depth.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::bind::{self, Bindable};
use super::error::ConvertError;
use super::value::{Map, Value};

/// Destination category, used to pick a kind converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    String,
    Bool,
    Int,
    Uint,
    Float,
    Seq,
    Struct,
    Optional,
    Other,
}

/// Describes a conversion destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub kind: Kind,
    pub type_name: &'static str,
    /// Bit width for numeric kinds; zero otherwise.
    pub bits: u32,
}

impl Target {
    pub fn of<T: ?Sized>(kind: Kind) -> Self {
        Self {
            kind,
            type_name: std::any::type_name::<T>(),
            bits: 0,
        }
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }
}

/// A type the registry can produce from a raw configuration value.
pub trait Convertible: Sized + Send + 'static {
    fn target() -> Target;

    /// Builds `Self` from the output of the kind converter for
    /// [`target`](Self::target)'s kind.
    fn from_canonical(value: Value, registry: &ConverterRegistry) -> Result<Self, ConvertError>;
}

type ExactFn = Arc<dyn Fn(&Value) -> Result<Box<dyn Any + Send>, ConvertError> + Send + Sync>;
type KindFn = Arc<dyn Fn(&Value, &Target) -> Result<Value, ConvertError> + Send + Sync>;

/// Exact-type and kind converters.
#[derive(Clone)]
pub struct ConverterRegistry {
    exact: HashMap<TypeId, ExactFn>,
    kinds: HashMap<Kind, KindFn>,
}

impl ConverterRegistry {
    /// Creates a registry with the default converters.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_kind(Kind::String, to_string);
        registry.register_kind(Kind::Bool, to_bool);
        registry.register_kind(Kind::Int, to_int);
        registry.register_kind(Kind::Uint, to_uint);
        registry.register_kind(Kind::Float, to_float);
        registry.register_kind(Kind::Seq, to_seq);
        registry.register_kind(Kind::Struct, to_struct);
        registry.register_kind(Kind::Optional, |v, _| Ok(v.clone()));
        registry.register_kind(Kind::Other, |v, _| Ok(v.clone()));
        registry.register::<Duration>(parse_duration);
        registry.register::<Url>(parse_url);
        registry
    }

    /// A registry with no converters at all.
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            kinds: HashMap::new(),
        }
    }

    /// Registers a converter for exactly `T`, replacing any previous one.
    pub fn register<T: Send + 'static>(
        &mut self,
        converter: impl Fn(&Value) -> Result<T, ConvertError> + Send + Sync + 'static,
    ) {
        self.exact.insert(
            TypeId::of::<T>(),
            Arc::new(move |value| converter(value).map(|t| Box::new(t) as Box<dyn Any + Send>)),
        );
    }

    /// Registers a normalizing converter for every destination of `kind`.
    pub fn register_kind(
        &mut self,
        kind: Kind,
        converter: impl Fn(&Value, &Target) -> Result<Value, ConvertError> + Send + Sync + 'static,
    ) {
        self.kinds.insert(kind, Arc::new(converter));
    }

    pub fn has_exact<T: 'static>(&self) -> bool {
        self.exact.contains_key(&TypeId::of::<T>())
    }

    /// Converts `value` into `T`.
    pub fn convert<T: Convertible>(&self, value: &Value) -> Result<T, ConvertError> {
        let target = T::target();

        if let Some(converter) = self.exact.get(&TypeId::of::<T>()) {
            return converter(value)?
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| ConvertError::Unsupported {
                    from: value.type_name(),
                    to: target.type_name,
                });
        }

        let canonical = self.normalize(value, &target)?;
        T::from_canonical(canonical, self)
    }

    /// Runs only the kind converter for `target`.
    pub fn normalize(&self, value: &Value, target: &Target) -> Result<Value, ConvertError> {
        match self.kinds.get(&target.kind) {
            Some(converter) => converter(value, target),
            None => Err(ConvertError::Unsupported {
                from: value.type_name(),
                to: target.type_name,
            }),
        }
    }

    /// Binds a map-shaped value into a [`Bindable`] struct, converting its
    /// fields through this registry.
    pub fn convert_struct<T: Bindable>(&self, value: &Value) -> Result<T, ConvertError> {
        let mut out = T::default();
        bind::bind_value(&mut out, value, self).map_err(|e| ConvertError::Bind(Box::new(e)))?;
        Ok(out)
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("exact", &self.exact.len())
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn unsupported(value: &Value, target: &Target) -> ConvertError {
    ConvertError::Unsupported {
        from: value.type_name(),
        to: target.type_name,
    }
}

fn to_string(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    match value {
        Value::Map(_) => Err(unsupported(value, target)),
        other => Ok(Value::String(other.to_string())),
    }
}

/// Accepts `true`/`false` in any case, `1`/`0`, `t`/`f`, `yes`/`no` and
/// `on`/`off`.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn to_bool(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(i) => Ok(Value::Bool(*i != 0)),
        Value::String(s) => parse_bool(s)
            .map(Value::Bool)
            .ok_or_else(|| ConvertError::invalid(s, target.type_name, "not a boolean")),
        other => Err(unsupported(other, target)),
    }
}

// `i64::MAX as f64` rounds up to 2^63, so the upper bounds are exclusive.
const I64_MIN_F: f64 = -9.223372036854775808e18;
const I64_END_F: f64 = 9.223372036854775808e18;
const U64_END_F: f64 = 1.8446744073709551616e19;

fn signed_bounds(bits: u32) -> (i64, i64) {
    match bits {
        0 | 64.. => (i64::MIN, i64::MAX),
        n => (-(1i64 << (n - 1)), (1i64 << (n - 1)) - 1),
    }
}

fn to_int(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    let i = match value {
        Value::Int(i) => *i,
        Value::Float(x) if !x.is_finite() || x.fract() != 0.0 => {
            return Err(ConvertError::invalid(x, target.type_name, "not an integer"))
        }
        Value::Float(x) if *x >= I64_MIN_F && *x < I64_END_F => *x as i64,
        Value::Float(x) => {
            return Err(ConvertError::OutOfRange {
                value: x.to_string(),
                to: target.type_name,
            })
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| ConvertError::invalid(s, target.type_name, e))?,
        other => return Err(unsupported(other, target)),
    };

    let (min, max) = signed_bounds(target.bits);
    if i < min || i > max {
        return Err(ConvertError::OutOfRange {
            value: i.to_string(),
            to: target.type_name,
        });
    }
    Ok(Value::Int(i))
}

/// Values above `i64::MAX` are returned as their decimal string.
fn to_uint(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    let out_of_range = |v: &dyn fmt::Display| ConvertError::OutOfRange {
        value: v.to_string(),
        to: target.type_name,
    };

    let u = match value {
        Value::Int(i) => u64::try_from(*i).map_err(|_| out_of_range(i))?,
        Value::Float(x) if !x.is_finite() || x.fract() != 0.0 => {
            return Err(ConvertError::invalid(x, target.type_name, "not an unsigned integer"))
        }
        Value::Float(x) if *x >= 0.0 && *x < U64_END_F => *x as u64,
        Value::Float(x) => return Err(out_of_range(x)),
        Value::String(s) => {
            let s = s.trim();
            if s.starts_with('-') {
                return Err(out_of_range(&s));
            }
            s.parse::<u64>()
                .map_err(|e| ConvertError::invalid(s, target.type_name, e))?
        }
        other => return Err(unsupported(other, target)),
    };

    let max = match target.bits {
        0 | 64.. => u64::MAX,
        n => (1u64 << n) - 1,
    };
    if u > max {
        return Err(out_of_range(&u));
    }
    Ok(i64::try_from(u)
        .map(Value::Int)
        .unwrap_or_else(|_| Value::String(u.to_string())))
}

fn to_float(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    let x = match value {
        Value::Float(x) => *x,
        Value::Int(i) => *i as f64,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| ConvertError::invalid(s, target.type_name, e))?,
        other => return Err(unsupported(other, target)),
    };
    if target.bits == 32 && x.is_finite() && x.abs() > f64::from(f32::MAX) {
        return Err(ConvertError::OutOfRange {
            value: x.to_string(),
            to: target.type_name,
        });
    }
    Ok(Value::Float(x))
}

/// Lists pass through; strings split on commas; other scalars become a
/// single-element list.
fn to_seq(value: &Value, _target: &Target) -> Result<Value, ConvertError> {
    Ok(Value::List(match value {
        Value::List(items) => items.clone(),
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => s.split(',').map(|p| Value::from(p.trim())).collect(),
        other => vec![other.clone()],
    }))
}

fn to_struct(value: &Value, target: &Target) -> Result<Value, ConvertError> {
    match value {
        Value::Map(_) => Ok(value.clone()),
        other => Err(unsupported(other, target)),
    }
}

/// Parses `1h30m`, `250ms`, `1.5s` and the like. A bare number is seconds.
pub fn parse_duration(value: &Value) -> Result<Duration, ConvertError> {
    const TO: &str = "Duration";

    let text = match value {
        Value::Int(i) => {
            return u64::try_from(*i)
                .map(Duration::from_secs)
                .map_err(|_| ConvertError::invalid(i, TO, "negative duration"))
        }
        Value::Float(x) => {
            return Duration::try_from_secs_f64(*x).map_err(|e| ConvertError::invalid(x, TO, e))
        }
        Value::String(s) => s.trim(),
        other => {
            return Err(ConvertError::Unsupported {
                from: other.type_name(),
                to: TO,
            })
        }
    };

    if text.is_empty() {
        return Err(ConvertError::invalid(text, TO, "empty duration"));
    }
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    if text.starts_with('-') {
        return Err(ConvertError::invalid(text, TO, "negative duration"));
    }

    let mut nanos = 0f64;
    let mut rest = text.strip_prefix('+').unwrap_or(text);
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(ConvertError::invalid(text, TO, "expected a number"));
        }
        let number: f64 = rest[..num_end]
            .parse()
            .map_err(|e| ConvertError::invalid(text, TO, e))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "\u{b5}s" | "\u{3bc}s" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(ConvertError::invalid(text, TO, "missing unit")),
            unit => return Err(ConvertError::invalid(text, TO, format!("unknown unit {unit:?}"))),
        };
        nanos += number * scale;
        rest = &rest[unit_end..];
    }

    if !nanos.is_finite() || nanos.round() >= U64_END_F {
        return Err(ConvertError::OutOfRange {
            value: text.to_string(),
            to: TO,
        });
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

fn parse_url(value: &Value) -> Result<Url, ConvertError> {
    let text = value.to_string();
    Url::parse(text.trim()).map_err(|e| ConvertError::invalid(&text, "Url", e))
}

impl Convertible for String {
    fn target() -> Target {
        Target::of::<Self>(Kind::String)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}

impl Convertible for PathBuf {
    fn target() -> Target {
        Target::of::<Self>(Kind::String)
    }

    fn from_canonical(value: Value, registry: &ConverterRegistry) -> Result<Self, ConvertError> {
        String::from_canonical(value, registry).map(PathBuf::from)
    }
}

impl Convertible for bool {
    fn target() -> Target {
        Target::of::<Self>(Kind::Bool)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ConvertError::Unsupported {
                from: other.type_name(),
                to: "bool",
            }),
        }
    }
}

macro_rules! convertible_signed {
    ($($t:ty),*) => {$(
        impl Convertible for $t {
            fn target() -> Target {
                Target::of::<Self>(Kind::Int).with_bits(<$t>::BITS)
            }

            fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
                match value {
                    Value::Int(i) => <$t>::try_from(i).map_err(|_| ConvertError::OutOfRange {
                        value: i.to_string(),
                        to: stringify!($t),
                    }),
                    other => Err(ConvertError::Unsupported {
                        from: other.type_name(),
                        to: stringify!($t),
                    }),
                }
            }
        }
    )*};
}

macro_rules! convertible_unsigned {
    ($($t:ty),*) => {$(
        impl Convertible for $t {
            fn target() -> Target {
                Target::of::<Self>(Kind::Uint).with_bits(<$t>::BITS)
            }

            fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
                let out_of_range = |v: &dyn fmt::Display| ConvertError::OutOfRange {
                    value: v.to_string(),
                    to: stringify!($t),
                };
                match value {
                    Value::Int(i) => <$t>::try_from(i).map_err(|_| out_of_range(&i)),
                    Value::String(s) => s
                        .parse::<$t>()
                        .map_err(|_| out_of_range(&s)),
                    other => Err(ConvertError::Unsupported {
                        from: other.type_name(),
                        to: stringify!($t),
                    }),
                }
            }
        }
    )*};
}

convertible_signed!(i8, i16, i32, i64, isize);
convertible_unsigned!(u8, u16, u32, u64, usize);

impl Convertible for f64 {
    fn target() -> Target {
        Target::of::<Self>(Kind::Float).with_bits(64)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::Float(x) => Ok(x),
            Value::Int(i) => Ok(i as f64),
            other => Err(ConvertError::Unsupported {
                from: other.type_name(),
                to: "f64",
            }),
        }
    }
}

impl Convertible for f32 {
    fn target() -> Target {
        Target::of::<Self>(Kind::Float).with_bits(32)
    }

    fn from_canonical(value: Value, registry: &ConverterRegistry) -> Result<Self, ConvertError> {
        f64::from_canonical(value, registry).map(|x| x as f32)
    }
}

impl Convertible for Duration {
    fn target() -> Target {
        Target::of::<Self>(Kind::Other)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        parse_duration(&value)
    }
}

impl Convertible for Url {
    fn target() -> Target {
        Target::of::<Self>(Kind::Other)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        parse_url(&value)
    }
}

impl Convertible for Value {
    fn target() -> Target {
        Target::of::<Self>(Kind::Other)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        Ok(value)
    }
}

impl Convertible for Map {
    fn target() -> Target {
        Target::of::<Self>(Kind::Struct)
    }

    fn from_canonical(value: Value, _: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::Map(map) => Ok(map),
            other => Err(ConvertError::Unsupported {
                from: other.type_name(),
                to: "Map",
            }),
        }
    }
}

impl<T: Convertible> Convertible for Vec<T> {
    fn target() -> Target {
        Target::of::<Self>(Kind::Seq)
    }

    fn from_canonical(value: Value, registry: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::List(items) => items.iter().map(|item| registry.convert::<T>(item)).collect(),
            other => Err(ConvertError::Unsupported {
                from: other.type_name(),
                to: std::any::type_name::<Self>(),
            }),
        }
    }
}

impl<T: Convertible> Convertible for Option<T> {
    fn target() -> Target {
        Target::of::<Self>(Kind::Optional)
    }

    fn from_canonical(value: Value, registry: &ConverterRegistry) -> Result<Self, ConvertError> {
        match value {
            Value::Null => Ok(None),
            other => registry.convert::<T>(&other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bind::{Descriptor, Field};
    use std::sync::OnceLock;

    #[test]
    fn test_scalars_from_strings() {
        let r = ConverterRegistry::new();
        assert_eq!(r.convert::<i32>(&Value::from(" 42 ")).unwrap(), 42);
        assert_eq!(r.convert::<u16>(&Value::from("8080")).unwrap(), 8080);
        assert_eq!(r.convert::<f64>(&Value::from("2.5")).unwrap(), 2.5);
        assert!(r.convert::<bool>(&Value::from("yes")).unwrap());
        assert!(!r.convert::<bool>(&Value::from("0")).unwrap());
        assert_eq!(r.convert::<String>(&Value::Int(7)).unwrap(), "7");
    }

    #[test]
    fn test_width_aware_range_checks() {
        let r = ConverterRegistry::new();
        assert!(matches!(
            r.convert::<i8>(&Value::Int(200)),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert!(matches!(
            r.convert::<u8>(&Value::from("256")),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert!(matches!(
            r.convert::<u32>(&Value::Int(-1)),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert_eq!(r.convert::<i8>(&Value::Int(-128)).unwrap(), -128);
        assert_eq!(r.convert::<u64>(&Value::from("18446744073709551615")).unwrap(), u64::MAX);
    }

    #[test]
    fn test_float_integer_bounds() {
        let r = ConverterRegistry::new();
        let two_63 = 9_223_372_036_854_775_808.0_f64;
        assert!(matches!(
            r.convert::<i64>(&Value::Float(two_63)),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert_eq!(r.convert::<i64>(&Value::Float(-two_63)).unwrap(), i64::MIN);
        assert_eq!(r.convert::<i64>(&Value::Float(1e18)).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(r.convert::<u64>(&Value::Float(two_63)).unwrap(), 1u64 << 63);
        assert!(matches!(
            r.convert::<u64>(&Value::Float(two_63 * 2.0)),
            Err(ConvertError::OutOfRange { .. })
        ));
        for bad in [f64::NAN, f64::INFINITY, 1.5] {
            assert!(matches!(
                r.convert::<i64>(&Value::Float(bad)),
                Err(ConvertError::Invalid { .. })
            ));
        }
        assert!(matches!(
            r.convert::<Duration>(&Value::from("20000000000s")),
            Err(ConvertError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_values() {
        let r = ConverterRegistry::new();
        assert!(matches!(
            r.convert::<i64>(&Value::from("abc")),
            Err(ConvertError::Invalid { .. })
        ));
        assert!(matches!(
            r.convert::<bool>(&Value::from("maybe")),
            Err(ConvertError::Invalid { .. })
        ));
        assert!(matches!(
            r.convert::<i64>(&Value::List(vec![])),
            Err(ConvertError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_durations() {
        let r = ConverterRegistry::new();
        assert_eq!(
            r.convert::<Duration>(&Value::from("1h30m")).unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            r.convert::<Duration>(&Value::from("250ms")).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            r.convert::<Duration>(&Value::from("1.5s")).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(r.convert::<Duration>(&Value::Int(30)).unwrap(), Duration::from_secs(30));
        assert_eq!(r.convert::<Duration>(&Value::from("30")).unwrap(), Duration::from_secs(30));
        assert!(r.convert::<Duration>(&Value::from("10 parsecs")).is_err());
        assert!(r.convert::<Duration>(&Value::from("-5s")).is_err());
    }

    #[test]
    fn test_urls() {
        let r = ConverterRegistry::new();
        let url = r.convert::<Url>(&Value::from("https://example.com:8443/x")).unwrap();
        assert_eq!(url.port(), Some(8443));
        assert!(r.convert::<Url>(&Value::from("not a url")).is_err());
    }

    #[test]
    fn test_sequences() {
        let r = ConverterRegistry::new();
        assert_eq!(
            r.convert::<Vec<String>>(&Value::from("a, b,c")).unwrap(),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            r.convert::<Vec<u16>>(&Value::List(vec![Value::Int(1), Value::from("2")])).unwrap(),
            vec![1, 2]
        );
        assert!(r.convert::<Vec<String>>(&Value::from("")).unwrap().is_empty());
        assert_eq!(r.convert::<Vec<i64>>(&Value::Int(5)).unwrap(), vec![5]);
    }

    #[test]
    fn test_optional() {
        let r = ConverterRegistry::new();
        assert_eq!(r.convert::<Option<i32>>(&Value::Null).unwrap(), None);
        assert_eq!(r.convert::<Option<i32>>(&Value::from("3")).unwrap(), Some(3));
    }

    #[test]
    fn test_exact_converter_overrides_kind() {
        let mut r = ConverterRegistry::new();
        r.register::<i32>(|_| Ok(-1));
        assert_eq!(r.convert::<i32>(&Value::Int(5)).unwrap(), -1);
        // Elements of a sequence go through the same registry.
        assert_eq!(r.convert::<Vec<i32>>(&Value::from("1,2")).unwrap(), vec![-1, -1]);
        // Other widths still use the kind converter.
        assert_eq!(r.convert::<i64>(&Value::Int(5)).unwrap(), 5);
    }

    #[test]
    fn test_kind_converter_override() {
        let mut r = ConverterRegistry::new();
        r.register_kind(Kind::String, |v, _| Ok(Value::String(v.to_string().to_uppercase())));
        assert_eq!(r.convert::<String>(&Value::from("abc")).unwrap(), "ABC");
    }

    #[test]
    fn test_missing_kind_converter_is_unsupported() {
        let r = ConverterRegistry::empty();
        assert!(matches!(
            r.convert::<String>(&Value::from("x")),
            Err(ConvertError::Unsupported { from: "string", .. })
        ));
    }

    #[derive(Debug, Default, PartialEq)]
    struct Endpoint {
        host: String,
        port: u16,
    }

    impl Bindable for Endpoint {
        fn descriptor() -> &'static Descriptor<Self> {
            static DESCRIPTOR: OnceLock<Descriptor<Endpoint>> = OnceLock::new();
            DESCRIPTOR.get_or_init(|| {
                Descriptor::new(vec![
                    Field::value("host", |e: &mut Endpoint| &mut e.host),
                    Field::value("port", |e: &mut Endpoint| &mut e.port),
                ])
            })
        }
    }

    #[test]
    fn test_convert_struct_shares_registry() {
        let mut r = ConverterRegistry::new();
        r.register::<u16>(|_| Ok(1));
        let value = Value::Map(Map::from([
            ("host".to_string(), Value::from("db")),
            ("port".to_string(), Value::from("5432")),
        ]));
        assert_eq!(
            r.convert_struct::<Endpoint>(&value).unwrap(),
            Endpoint {
                host: "db".into(),
                port: 1
            }
        );
        assert!(matches!(
            r.convert_struct::<Endpoint>(&Value::from("db:5432")),
            Err(ConvertError::Bind(_))
        ));
    }
}
