#![forbid(unsafe_code)]

//! Dynamic values carried by emissions and stored in properties.
//!
//! Scalars are plain data. `List` and `Map` hold handles to observable
//! containers, so cloning a `Value::List` shares the same underlying list
//! (mutations through either handle are visible to both and notify the
//! owning property, if any).
//!
//! # Equality
//!
//! Equality is structural. `Int` and `Float` compare numerically
//! (`Int(1) == Float(1.0)`), which is what property change detection uses.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::container::{ObservableList, ObservableMap};

/// A dynamically typed payload or property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ObservableList),
    Map(ObservableMap),
}

impl Value {
    /// Build a detached list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(ObservableList::from_values(items.into_iter().map(Into::into)))
    }

    /// Build a detached map value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(ObservableMap::from_entries(
            entries.into_iter().map(|(k, v)| (k.into(), v.into())),
        ))
    }

    /// Name of the value's type, as used in validation messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Map(_) => "dict",
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; `Int` widens to `f64`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Numeric ordering between `Int`/`Float` values, exact for large
    /// integers. `None` if either side is not a number or is NaN.
    #[must_use]
    pub fn numeric_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(*a, *b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(*b, *a).map(Ordering::reverse),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&ObservableList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&ObservableMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Deep copy with every container detached from its parent.
    ///
    /// The result shares nothing with `self`; mutating it notifies nobody.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        match self {
            Self::List(list) => Self::List(list.snapshot()),
            Self::Map(map) => Self::Map(map.snapshot()),
            other => other.clone(),
        }
    }
}

/// Exact ordering of an integer against a float; `None` for NaN.
fn cmp_int_float(i: i64, x: f64) -> Option<Ordering> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if x.is_nan() {
        return None;
    }
    if x >= LIMIT {
        return Some(Ordering::Less);
    }
    if x < -LIMIT {
        return Some(Ordering::Greater);
    }
    // In range, so the truncation is exact.
    let whole = x.trunc() as i64;
    Some(i.cmp(&whole).then_with(|| {
        let frac = x - x.trunc();
        if frac > 0.0 {
            Ordering::Less
        } else if frac < 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                cmp_int_float(*a, *b) == Some(Ordering::Equal)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(list) => fmt::Debug::fmt(list, f),
            Self::Map(map) => fmt::Debug::fmt(map, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Self::Float(f64::from(x))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::None, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(entries: BTreeMap<String, T>) -> Self {
        Self::map(entries)
    }
}

impl From<ObservableList> for Value {
    fn from(list: ObservableList) -> Self {
        Self::List(list)
    }
}

impl From<ObservableMap> for Value {
    fn from(map: ObservableMap) -> Self {
        Self::Map(map)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};

        match self {
            Self::None => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(list) => {
                let items = list.to_vec();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let entries = map.to_btree();
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in &entries {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_float_equality_is_exact_past_f64_precision() {
        let big = 9_007_199_254_740_993_i64; // 2^53 + 1
        assert_ne!(Value::Int(big), Value::Float(9_007_199_254_740_992.0));
        assert_eq!(Value::Int(1 << 53), Value::Float(9_007_199_254_740_992.0));
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));
        assert_ne!(Value::Int(i64::MAX), Value::Float(9_223_372_036_854_775_808.0));
        assert_ne!(Value::Int(0), Value::Float(f64::NAN));
    }

    #[test]
    fn numeric_cmp_orders_mixed_values() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(2).numeric_cmp(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(-0.5).numeric_cmp(&Value::Int(-1)), Some(Ordering::Greater));
        assert_eq!(
            Value::Int(i64::MAX).numeric_cmp(&Value::Int(i64::MAX - 1)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int(1).numeric_cmp(&Value::from("1")), None);
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn containers_compare_by_content() {
        let a = Value::list([1, 2, 3]);
        let b = Value::from(vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_ne!(a, Value::list([1, 2]));

        let m1 = Value::map([("k", "v")]);
        let m2 = Value::map([("k", "v")]);
        assert_eq!(m1, m2);
    }

    #[test]
    fn snapshot_is_detached() {
        let original = Value::list([Value::list([1])]);
        let copy = original.snapshot();
        original.as_list().unwrap().push(2).unwrap();
        assert_eq!(copy, Value::list([Value::list([1])]));
        assert_ne!(copy, original);
    }

    #[test]
    fn display_and_type_names() {
        assert_eq!(Value::Float(-11.0).to_string(), "-11.0");
        assert_eq!(Value::Int(-11).to_string(), "-11");
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(format!("{:?}", Value::from("hi")), "\"hi\"");
        assert_eq!(Value::None.type_name(), "NoneType");
        assert_eq!(Value::map::<[(&str, i32); 0], _, _>([]).type_name(), "dict");
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert!(Value::from(None::<i32>).is_none());
    }
}
