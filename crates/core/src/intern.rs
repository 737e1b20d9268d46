//! Process-wide interned string pool
//!
//! Every string object in the system is handed out by [`intern`], so two
//! string values with the same content always share one allocation and can
//! be compared by pointer. The pool owns one strong reference per entry;
//! [`clear`] drops those references, after which content that is interned
//! again gets a fresh canonical object.
//!
//! The core is single-threaded, but the pool lives behind a `Mutex` so that
//! the canonical-object guarantee holds process-wide.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::value::Object;

static POOL: OnceLock<Mutex<HashMap<Box<str>, Arc<Object>>>> = OnceLock::new();

fn pool() -> &'static Mutex<HashMap<Box<str>, Arc<Object>>> {
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Return the canonical string object for `content`, creating it on first
/// use. Idempotent: `intern(x)` always returns the same allocation until the
/// pool is cleared.
pub fn intern(content: &str) -> Arc<Object> {
    let mut pool = pool().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(obj) = pool.get(content) {
        return Arc::clone(obj);
    }
    let obj = Arc::new(Object::String(Box::from(content)));
    pool.insert(Box::from(content), Arc::clone(&obj));
    obj
}

/// Number of distinct strings currently interned.
pub fn interned_count() -> usize {
    pool().lock().unwrap_or_else(|e| e.into_inner()).len()
}

/// Drop the pool's references to every interned object. Objects still
/// reachable through live values stay alive; the rest are freed here.
pub fn clear() {
    pool().lock().unwrap_or_else(|e| e.into_inner()).clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_intern_is_idempotent() {
        let a = intern("canonical");
        let b = intern("canonical");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    #[serial]
    fn test_intern_preserves_content() {
        let content = "exact bytes \u{00e9}\u{4e16}";
        let obj = intern(content);
        assert_eq!(obj.as_str(), content);
    }

    #[test]
    #[serial]
    fn test_distinct_content_distinct_objects() {
        let a = intern("left");
        let b = intern("right");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    #[serial]
    fn test_clear_resets_pool() {
        clear();
        let before = intern("transient");
        assert_eq!(interned_count(), 1);
        clear();
        assert_eq!(interned_count(), 0);
        // The old object survives through its own reference; re-interning
        // the same content yields a new canonical object.
        let after = intern("transient");
        assert!(!Arc::ptr_eq(&before, &after));
        clear();
    }
}
