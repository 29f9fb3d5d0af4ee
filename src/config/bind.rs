//! Structural binding of the flat key space onto typed destinations.
//!
//! A destination type describes its fields once through a [`Descriptor`]:
//! the name a flat-key segment must match and a typed accessor. Each flat key
//! is split on `.` and walked segment by segment; the terminal segment's value
//! goes through the [`ConverterRegistry`].
//!
//! ```ignore
//! #[derive(Default)]
//! struct Server {
//!     host: String,
//!     port: u16,
//! }
//!
//! impl Bindable for Server {
//!     fn descriptor() -> &'static Descriptor<Self> {
//!         static DESCRIPTOR: OnceLock<Descriptor<Server>> = OnceLock::new();
//!         DESCRIPTOR.get_or_init(|| {
//!             Descriptor::new(vec![
//!                 Field::value("host", |s: &mut Server| &mut s.host),
//!                 Field::value("port", |s: &mut Server| &mut s.port).tag("listen_port"),
//!             ])
//!         })
//!     }
//! }
//! ```

use std::fmt;

use super::convert::{Convertible, ConverterRegistry};
use super::error::{BindError, ConvertError};
use super::value::{Map, Value};

/// Upper bound on the length of a sequence bound from indexed keys.
///
/// Flat keys arrive in lexical order (`x.10` before `x.2`), so indices can't
/// be checked against the current length; this caps the growth instead.
pub const MAX_SEQ_LEN: usize = 10_000;

fn index_out_of_range(key: &str, index: &str) -> BindError {
    BindError::IndexOutOfRange {
        key: key.to_string(),
        index: index.to_string(),
        max: MAX_SEQ_LEN,
    }
}

/// A type that can be populated from the key space.
pub trait Bindable: Default + Send + 'static {
    fn descriptor() -> &'static Descriptor<Self>;
}

type LeafSetter<T> =
    Box<dyn Fn(&mut T, &Value, &ConverterRegistry) -> Result<(), ConvertError> + Send + Sync>;
type BranchSetter<T> = Box<
    dyn Fn(&mut T, &str, &[&str], &Value, &ConverterRegistry) -> Result<(), BindError>
        + Send
        + Sync,
>;

enum Setter<T> {
    Leaf(LeafSetter<T>),
    Branch(BranchSetter<T>),
}

/// One bindable field of `T`.
pub struct Field<T> {
    name: &'static str,
    tag: Option<&'static str>,
    serde: Option<&'static str>,
    setter: Setter<T>,
}

impl<T: 'static> Field<T> {
    /// A scalar, sequence or other convertible field.
    pub fn value<V: Convertible>(
        name: &'static str,
        access: impl Fn(&mut T) -> &mut V + Send + Sync + 'static,
    ) -> Self {
        Self::with_setter(
            name,
            Setter::Leaf(Box::new(move |target, value, registry| {
                *access(target) = registry.convert::<V>(value)?;
                Ok(())
            })),
        )
    }

    /// A nested struct, addressed as `field.child`.
    pub fn nested<V: Bindable>(
        name: &'static str,
        access: impl Fn(&mut T) -> &mut V + Send + Sync + 'static,
    ) -> Self {
        Self::with_setter(
            name,
            Setter::Branch(Box::new(move |target, key, rest, value, registry| {
                let inner = access(target);
                if rest.is_empty() {
                    bind_value(inner, value, registry)
                } else {
                    bind_path(inner, key, rest, value, registry)
                }
            })),
        )
    }

    /// A sequence of structs, addressed as `field.<index>.child`.
    ///
    /// The sequence grows to fit the largest index seen. Indices at or above
    /// [`MAX_SEQ_LEN`] fail with [`BindError::IndexOutOfRange`].
    pub fn nested_seq<V: Bindable>(
        name: &'static str,
        access: impl Fn(&mut T) -> &mut Vec<V> + Send + Sync + 'static,
    ) -> Self {
        Self::with_setter(
            name,
            Setter::Branch(Box::new(move |target, key, rest, value, registry| {
                let items = access(target);
                let Some((index, tail)) = rest.split_first() else {
                    return match value {
                        Value::List(elements) => {
                            items.clear();
                            for element in elements {
                                let mut item = V::default();
                                bind_value(&mut item, element, registry)?;
                                items.push(item);
                            }
                            Ok(())
                        }
                        // The joined scalar form of a flattened list.
                        _ => Ok(()),
                    };
                };

                let index = match index.parse::<usize>() {
                    Ok(index) if index < MAX_SEQ_LEN => index,
                    Ok(_) => return Err(index_out_of_range(key, index)),
                    Err(_) if index.bytes().all(|b| b.is_ascii_digit()) => {
                        return Err(index_out_of_range(key, index));
                    }
                    Err(_) => return Ok(()),
                };
                if items.len() <= index {
                    items.resize_with(index + 1, V::default);
                }
                let item = &mut items[index];
                if tail.is_empty() {
                    bind_value(item, value, registry)
                } else {
                    bind_path(item, key, tail, value, registry)
                }
            })),
        )
    }

    fn with_setter(name: &'static str, setter: Setter<T>) -> Self {
        Self {
            name,
            tag: None,
            serde: None,
            setter,
        }
    }

    /// Binding-tag name; takes precedence over the serde alias and field name.
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Serialization name, used when no binding tag is set.
    pub fn serde(mut self, alias: &'static str) -> Self {
        self.serde = Some(alias);
        self
    }

    /// The segment this field answers to.
    pub fn key(&self) -> &'static str {
        self.tag.or(self.serde).unwrap_or(self.name)
    }

    fn matches(&self, segment: &str) -> bool {
        self.key().eq_ignore_ascii_case(segment)
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("serde", &self.serde)
            .finish_non_exhaustive()
    }
}

/// The field table of a [`Bindable`] type, built once per type.
pub struct Descriptor<T> {
    type_name: &'static str,
    fields: Vec<Field<T>>,
}

impl<T: 'static> Descriptor<T> {
    pub fn new(fields: Vec<Field<T>>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            fields,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[Field<T>] {
        &self.fields
    }

    fn find(&self, segment: &str) -> Option<&Field<T>> {
        self.fields.iter().find(|field| field.matches(segment))
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Binds every entry of `data` into `target`.
///
/// Keys that resolve to no field of an object destination fail with
/// [`BindError::UnknownField`]. Missing keys leave fields untouched.
pub fn bind_map<T: Bindable>(
    target: &mut T,
    data: &Map,
    registry: &ConverterRegistry,
) -> Result<(), BindError> {
    for (key, value) in data {
        let path: Vec<&str> = key.split('.').collect();
        bind_path(target, key, &path, value, registry)?;
    }
    Ok(())
}

/// Binds a map-shaped value; null leaves `target` untouched.
pub(crate) fn bind_value<T: Bindable>(
    target: &mut T,
    value: &Value,
    registry: &ConverterRegistry,
) -> Result<(), BindError> {
    match value {
        Value::Map(map) => bind_map(target, map, registry),
        Value::Null => Ok(()),
        other => Err(BindError::NotAnObject {
            found: other.type_name(),
            target: T::descriptor().type_name(),
        }),
    }
}

fn bind_path<T: Bindable>(
    target: &mut T,
    key: &str,
    path: &[&str],
    value: &Value,
    registry: &ConverterRegistry,
) -> Result<(), BindError> {
    let Some((segment, rest)) = path.split_first() else {
        return Ok(());
    };

    let descriptor = T::descriptor();
    let field = descriptor
        .find(segment)
        .ok_or_else(|| BindError::UnknownField {
            field: segment.to_string(),
            target: descriptor.type_name(),
        })?;

    match &field.setter {
        // A scalar has no children; deeper segments (such as the indexed
        // entries of a flattened list) are ignored.
        Setter::Leaf(_) if !rest.is_empty() || value.is_null() => Ok(()),
        Setter::Leaf(set) => set(target, value, registry).map_err(|source| BindError::Convert {
            key: key.to_string(),
            source,
        }),
        Setter::Branch(set) => set(target, key, rest, value, registry),
    }
}
