/// `scripting/registry.rs` — callable and flag-table names for completion/help
///
/// Filled once from the first VM opened, then read-only. `OnceLock` keeps
/// the fill race-free if a second engine is ever opened concurrently.
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::{Arc, OnceLock};

use mlua::{Lua, Table, Value};

/// Tables whose functions are offered for completion. `_G` entries get no
/// prefix.
pub const FUNCTION_TABLES: &[&str] = &[
    "_G", "string", "package", "os", "io", "bc", "progress", "bit", "rex", "utils", "table",
    "math", "debug", "coroutine", "lpeg", "sqlite3",
];

/// Flag/enum-like tables whose keys are offered as `table.key`.
pub const FLAG_TABLES: &[&str] = &[
    "trigger_flag",
    "alias_flag",
    "timer_flag",
    "custom_colour",
    "error_code",
    "sendto",
    "miniwin",
];

/// Internal hook that is never offered.
const HIDDEN_FUNCTION: &str = "newproxy";

#[derive(Debug, Default)]
pub struct NameRegistry {
    functions: OnceLock<BTreeSet<String>>,
    table_entries: OnceLock<BTreeSet<String>>,
}

impl NameRegistry {
    pub const fn new() -> Self {
        Self {
            functions: OnceLock::new(),
            table_entries: OnceLock::new(),
        }
    }

    /// The process-wide registry used by engines that were not given one.
    pub fn shared() -> Arc<NameRegistry> {
        static SHARED: OnceLock<Arc<NameRegistry>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(NameRegistry::new())))
    }

    /// Fill both sets from `lua` unless already filled. Returns true if this
    /// call did the work.
    pub fn populate(&self, lua: &Lua) -> bool {
        let mut filled = false;
        self.functions.get_or_init(|| {
            filled = true;
            collect_functions(lua)
        });
        self.table_entries.get_or_init(|| collect_table_entries(lua));
        if filled {
            log::debug!(
                "[scripting] name registry: {} functions, {} table entries",
                self.functions().len(),
                self.table_entries().len()
            );
        }
        filled
    }

    pub fn is_populated(&self) -> bool {
        self.functions.get().is_some()
    }

    pub fn functions(&self) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.functions.get().unwrap_or(&EMPTY)
    }

    pub fn table_entries(&self) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.table_entries.get().unwrap_or(&EMPTY)
    }

    /// Names starting with `prefix`, for completion.
    pub fn complete<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let from = (Bound::Included(prefix), Bound::Unbounded);
        let matching = move |set: &'a BTreeSet<String>| {
            set.range::<str, _>(from)
                .map(String::as_str)
                .take_while(move |name| name.starts_with(prefix))
        };
        matching(self.functions()).chain(matching(self.table_entries()))
    }
}

fn global_table(lua: &Lua, name: &str) -> Option<Table> {
    match lua.globals().raw_get::<Value>(name) {
        Ok(Value::Table(t)) => Some(t),
        _ => None,
    }
}

fn key_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.to_string_lossy()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn collect_functions(lua: &Lua) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for &table_name in FUNCTION_TABLES {
        let Some(table) = global_table(lua, table_name) else {
            continue;
        };
        for (key, value) in table.pairs::<Value, Value>().flatten() {
            if !matches!(value, Value::Function(_)) {
                continue;
            }
            let Some(name) = key_name(&key) else { continue };
            if name.starts_with('_') {
                continue;
            }
            if table_name == "_G" {
                names.insert(name);
            } else {
                names.insert(format!("{table_name}.{name}"));
            }
        }
    }
    names.remove(HIDDEN_FUNCTION);
    names
}

fn collect_table_entries(lua: &Lua) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for &table_name in FLAG_TABLES {
        let Some(table) = global_table(lua, table_name) else {
            continue;
        };
        for (key, _) in table.pairs::<Value, Value>().flatten() {
            if let Some(name) = key_name(&key) {
                names.insert(format!("{table_name}.{name}"));
            }
        }
    }
    names
}
