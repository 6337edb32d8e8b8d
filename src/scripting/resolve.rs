/// `scripting/resolve.rs` — dotted-name lookup in the VM's global namespace
///
/// `a.b.c` is resolved by walking tables from `_G`. Every intermediate
/// segment must be a table and the last one must be callable.
use mlua::{Function, String as LuaString, Table, Value};

/// The capabilities the dispatch core cares about. Anything else a Lua value
/// can be (userdata, threads, booleans) is `Other` and never resolvable.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Nil,
    Number(f64),
    String(LuaString),
    Table(Table),
    Callable(Function),
    Other(&'static str),
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => ScriptValue::Nil,
            Value::Integer(i) => ScriptValue::Number(i as f64),
            Value::Number(n) => ScriptValue::Number(n),
            Value::String(s) => ScriptValue::String(s),
            Value::Table(t) => ScriptValue::Table(t),
            Value::Function(f) => ScriptValue::Callable(f),
            other => ScriptValue::Other(other.type_name()),
        }
    }
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Table(_) => "table",
            ScriptValue::Callable(_) => "function",
            ScriptValue::Other(name) => name,
        }
    }

    /// Look `key` up if this is a table. Metamethods are honoured; a
    /// failing `__index` counts as "not there".
    fn field(&self, key: &str) -> ScriptValue {
        match self {
            ScriptValue::Table(t) => t
                .get::<Value>(key)
                .map(ScriptValue::from)
                .unwrap_or(ScriptValue::Nil),
            _ => ScriptValue::Nil,
        }
    }
}

/// Walk `path` from `root`. Returns whatever the last segment holds, or
/// `None` if an intermediate segment is not a table or a segment is empty.
pub fn resolve_path(root: &Table, path: &str) -> Option<ScriptValue> {
    let mut current = ScriptValue::Table(root.clone());
    for segment in path.split('.') {
        if segment.is_empty() || !matches!(current, ScriptValue::Table(_)) {
            return None;
        }
        current = current.field(segment);
    }
    Some(current)
}

/// Resolve `name` to a callable, or `None`.
pub fn resolve_callable(globals: &Table, name: &str) -> Option<Function> {
    match resolve_path(globals, name)? {
        ScriptValue::Callable(f) => Some(f),
        _ => None,
    }
}
