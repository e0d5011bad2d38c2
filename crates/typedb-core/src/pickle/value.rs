//! Decoded primitive values.
//!
//! [`RawValue`] is the dynamically-typed tree the decoder produces. It carries
//! no domain meaning; the record layer in `typedb-python` interprets it.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A decoded primitive value.
///
/// Mappings are keyed by strings and ordered by key, so two mappings with the
/// same entries compare equal regardless of the order the stream wrote them in.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// `None` in the source stream (also used for unsupported globals).
    None,
    Bool(bool),
    Int(i64),
    /// An integer that does not fit in `i64`, as decimal text.
    BigInt(String),
    Float(f64),
    /// Unicode or legacy 8-bit string (legacy strings are decoded as Latin-1).
    Str(String),
    List(Vec<RawValue>),
    Tuple(Vec<RawValue>),
    Dict(BTreeMap<String, RawValue>),
}

impl RawValue {
    /// Build a mapping from `(key, value)` pairs. Later duplicates win.
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RawValue)>,
    {
        RawValue::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list from values.
    pub fn list<I: IntoIterator<Item = RawValue>>(items: I) -> Self {
        RawValue::List(items.into_iter().collect())
    }

    /// Build a tuple from values.
    pub fn tuple<I: IntoIterator<Item = RawValue>>(items: I) -> Self {
        RawValue::Tuple(items.into_iter().collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RawValue::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RawValue::Int(i) => Some(*i),
            RawValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Truthiness of a flag field. Integers are accepted since older
    /// scrapers wrote `0`/`1` for booleans.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            RawValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RawValue::Float(f) => Some(*f),
            RawValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, RawValue>> {
        match self {
            RawValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Lists and tuples are both ordered sequences.
    pub fn as_sequence(&self) -> Option<&[RawValue]> {
        match self {
            RawValue::List(items) | RawValue::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Mapping lookup; `None` when `self` is not a mapping or the key is absent.
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.as_dict()?.get(key)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::None => "none",
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) | RawValue::BigInt(_) => "int",
            RawValue::Float(_) => "float",
            RawValue::Str(_) => "str",
            RawValue::List(_) => "list",
            RawValue::Tuple(_) => "tuple",
            RawValue::Dict(_) => "dict",
        }
    }

    /// Whether the value is a mutable container (filled after creation).
    pub(crate) fn is_container(&self) -> bool {
        matches!(self, RawValue::List(_) | RawValue::Dict(_))
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Str(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Str(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RawValue::None, Into::into)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::None => write!(f, "None"),
            RawValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            RawValue::Int(i) => write!(f, "{}", i),
            RawValue::BigInt(s) => write!(f, "{}", s),
            RawValue::Float(x) => write!(f, "{}", x),
            RawValue::Str(s) => write!(f, "{:?}", s),
            RawValue::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            RawValue::Tuple(items) => {
                write!(f, "(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            RawValue::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[RawValue]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawValue::None => serializer.serialize_unit(),
            RawValue::Bool(b) => serializer.serialize_bool(*b),
            RawValue::Int(i) => serializer.serialize_i64(*i),
            RawValue::BigInt(s) => serializer.serialize_str(s),
            RawValue::Float(x) => serializer.serialize_f64(*x),
            RawValue::Str(s) => serializer.serialize_str(s),
            RawValue::List(items) | RawValue::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            RawValue::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
