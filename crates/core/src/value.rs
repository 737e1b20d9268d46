//! Value: what Ell programs talk about
//!
//! A `Value` is pure data: scalars are stored inline, heap data is reached
//! through an `Arc<Object>`. The VM copies values freely; cloning an object
//! value only bumps a reference count.

use std::fmt;
use std::sync::Arc;

use crate::intern;

/// Heap-allocated entity referenced by [`Value::Obj`].
///
/// A closed sum rather than an open class hierarchy: adding an object kind
/// means adding a variant here and handling it at every match site.
#[derive(Debug)]
pub enum Object {
    /// Immutable byte sequence. UTF-8 is treated opaquely.
    String(Box<str>),
}

impl Object {
    /// Content of a string object.
    pub fn as_str(&self) -> &str {
        match self {
            Object::String(s) => s,
        }
    }
}

/// Tagged runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,

    /// Signed 32-bit integer
    Int(i32),

    /// IEEE-754 double
    Double(f64),

    Bool(bool),

    /// Reference to a heap object. All string objects are interned, so two
    /// string values are equal exactly when they share the allocation.
    Obj(Arc<Object>),
}

impl Value {
    /// Interned string value for `content`.
    pub fn string(content: &str) -> Value {
        Value::Obj(intern::intern(content))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Value::Int(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Obj(obj) if matches!(**obj, Object::String(_)))
    }

    /// # Panics
    /// Panics if the value is not an `Int`. Callers dispatch on the variant
    /// first; these accessors are for positions where the tag is known.
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(n) => *n,
            other => panic!("not an integer: {other:?}"),
        }
    }

    /// # Panics
    /// Panics if the value is not a `Double`.
    pub fn as_double(&self) -> f64 {
        match self {
            Value::Double(d) => *d,
            other => panic!("not a double: {other:?}"),
        }
    }

    /// # Panics
    /// Panics if the value is not a `Bool`.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("not a boolean: {other:?}"),
        }
    }

    /// # Panics
    /// Panics if the value is not a string object.
    pub fn as_string(&self) -> &str {
        match self {
            Value::Obj(obj) => obj.as_str(),
            other => panic!("not a string: {other:?}"),
        }
    }

    /// Text used when the value participates in string concatenation.
    /// Identical to the `print` form except that strings appear unquoted.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Obj(obj) => obj.as_str().to_string(),
        }
    }
}

/// Equality is defined only between values of the same variant; any
/// cross-variant comparison is false. `Null == Null` holds. Objects compare
/// by pointer identity, which the intern pool makes equivalent to content
/// equality for strings.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// The `print` form: `null`, `true`/`false`, decimal numbers, and strings
/// surrounded by double quotes.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Obj(obj) => write!(f, "\"{}\"", obj.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_equality_same_variant() {
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Int(4));
        assert_eq!(Value::Double(2.5), Value::Double(2.5));
        assert_eq!(Value::Bool(true), Value::Bool(true));
        assert_ne!(Value::Bool(true), Value::Bool(false));
    }

    #[test]
    fn test_equality_cross_variant_is_false() {
        assert_ne!(Value::Int(1), Value::Double(1.0));
        assert_ne!(Value::Int(0), Value::Bool(false));
        assert_ne!(Value::Null, Value::Bool(false));
        assert_ne!(Value::Null, Value::Int(0));
    }

    #[test]
    #[serial]
    fn test_string_equality_via_interning() {
        let a = Value::string("hello");
        let b = Value::string("hello");
        let c = Value::string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[serial]
    fn test_print_format() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::Double(2.1).to_string(), "2.1");
        assert_eq!(Value::Double(9.0).to_string(), "9");
        assert_eq!(Value::string("hi").to_string(), "\"hi\"");
    }

    #[test]
    #[serial]
    fn test_concat_text_is_unquoted() {
        assert_eq!(Value::string("hi").to_text(), "hi");
        assert_eq!(Value::Null.to_text(), "null");
        assert_eq!(Value::Bool(false).to_text(), "false");
        assert_eq!(Value::Int(7).to_text(), "7");
    }

    #[test]
    fn test_int_text_round_trips() {
        for n in [i32::MIN, i32::MIN + 1, -1, 0, 1, i32::MAX - 1, i32::MAX] {
            let text = Value::Int(n).to_text();
            assert_eq!(text.parse::<i32>(), Ok(n));
        }
    }

    #[test]
    #[serial]
    fn test_accessors() {
        assert_eq!(Value::Int(5).as_int(), 5);
        assert_eq!(Value::Double(0.5).as_double(), 0.5);
        assert!(Value::Bool(true).as_bool());
        assert_eq!(Value::string("s").as_string(), "s");
        assert!(Value::Null.is_null());
        assert!(Value::string("s").is_string());
        assert!(!Value::Int(1).is_string());
    }

    #[test]
    #[should_panic(expected = "not an integer")]
    fn test_as_int_panics_on_wrong_variant() {
        Value::Bool(true).as_int();
    }
}
