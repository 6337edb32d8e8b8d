/// `scripting/outcome.rs` — reading a callable's return values
///
/// Only the first returned value matters. Booleans are taken as-is; anything
/// else is coerced to a number. A number, including 0, is a truthy outcome:
/// the host treats "returned 0" as success, not as "false".
use mlua::{Lua, MultiValue, Value};
use serde::{Deserialize, Serialize};

/// What a dispatch entry point did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// No VM, or the site's token is broken. Nothing was called.
    Skipped,
    Invoked(T),
}

impl<T> Outcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }

    pub fn invoked(self) -> Option<T> {
        match self {
            Outcome::Invoked(v) => Some(v),
            Outcome::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarResult {
    Boolean(bool),
    Number(f64),
}

impl Default for ScalarResult {
    /// Returned when the callable returns nothing.
    fn default() -> Self {
        ScalarResult::Boolean(true)
    }
}

impl ScalarResult {
    pub fn is_truthy(&self) -> bool {
        match self {
            ScalarResult::Boolean(b) => *b,
            ScalarResult::Number(_) => true,
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            ScalarResult::Boolean(b) => f64::from(u8::from(*b)),
            ScalarResult::Number(n) => *n,
        }
    }
}

/// First return value as a scalar. Non-numeric values coerce to 0.
pub fn interpret_scalar(lua: &Lua, values: &MultiValue) -> ScalarResult {
    match values.iter().next() {
        None => ScalarResult::default(),
        Some(Value::Boolean(b)) => ScalarResult::Boolean(*b),
        Some(other) => {
            let n = lua.coerce_number(other.clone()).ok().flatten().unwrap_or(0.0);
            ScalarResult::Number(n)
        }
    }
}

/// First return value as raw bytes, if it is a string or a number. The
/// bytes are returned exactly as the script produced them.
pub fn interpret_text(lua: &Lua, values: &MultiValue) -> Option<Vec<u8>> {
    match values.iter().next()? {
        v @ (Value::String(_) | Value::Integer(_) | Value::Number(_)) => lua
            .coerce_string(v.clone())
            .ok()
            .flatten()
            .map(|s| s.as_bytes().to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(lua: &Lua, code: &str) -> MultiValue {
        lua.load(code).eval::<MultiValue>().unwrap()
    }

    #[test]
    fn false_is_falsy() {
        let lua = Lua::new();
        let r = interpret_scalar(&lua, &results(&lua, "return false"));
        assert_eq!(r, ScalarResult::Boolean(false));
        assert!(!r.is_truthy());
    }

    #[test]
    fn zero_is_truthy() {
        let lua = Lua::new();
        let r = interpret_scalar(&lua, &results(&lua, "return 0"));
        assert_eq!(r, ScalarResult::Number(0.0));
        assert!(r.is_truthy());
    }

    #[test]
    fn no_values_is_default_truthy() {
        let lua = Lua::new();
        let r = interpret_scalar(&lua, &results(&lua, "return"));
        assert_eq!(r, ScalarResult::Boolean(true));
    }

    #[test]
    fn numeric_strings_coerce_and_junk_is_zero() {
        let lua = Lua::new();
        assert_eq!(interpret_scalar(&lua, &results(&lua, "return '12'")), ScalarResult::Number(12.0));
        assert_eq!(interpret_scalar(&lua, &results(&lua, "return {}")), ScalarResult::Number(0.0));
        assert_eq!(interpret_scalar(&lua, &results(&lua, "return nil, false")), ScalarResult::Number(0.0));
    }

    #[test]
    fn only_first_value_counts() {
        let lua = Lua::new();
        let r = interpret_scalar(&lua, &results(&lua, "return true, false"));
        assert_eq!(r, ScalarResult::Boolean(true));
    }

    #[test]
    fn text_keeps_embedded_nul() {
        let lua = Lua::new();
        let t = interpret_text(&lua, &results(&lua, "return 'a\\0b'")).unwrap();
        assert_eq!(t, b"a\0b");
    }

    #[test]
    fn text_keeps_non_utf8_bytes() {
        let lua = Lua::new();
        let t = interpret_text(&lua, &results(&lua, "return 'ab' .. string.char(255, 0, 233)")).unwrap();
        assert_eq!(t, vec![97, 98, 255, 0, 233]);
    }

    #[test]
    fn text_from_number_and_absent_otherwise() {
        let lua = Lua::new();
        assert_eq!(interpret_text(&lua, &results(&lua, "return 5")).as_deref(), Some(&b"5"[..]));
        assert_eq!(interpret_text(&lua, &results(&lua, "return {}")), None);
        assert_eq!(interpret_text(&lua, &results(&lua, "return")), None);
    }
}
