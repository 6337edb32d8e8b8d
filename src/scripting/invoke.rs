/// `scripting/invoke.rs` — protected calls and the host-state scope around them
///
/// Calls go through the VM's own `xpcall`/`pcall`, captured when the engine
/// opens, so a failing script hands back its error value as data instead of
/// unwinding into Rust.
use mlua::{Function, Lua, MultiValue, Result as LuaResult, Value};

use super::error::vm_error_text;
use super::host::{ActionSource, NoteStyle, ScriptHost};
use super::resolve::{resolve_path, ScriptValue};

pub struct ProtectedInvoker {
    xpcall: Function,
    pcall: Function,
}

impl ProtectedInvoker {
    /// Grab `xpcall` and `pcall` from the globals. Must run before any
    /// untrusted script can replace them.
    pub fn capture(lua: &Lua) -> LuaResult<Self> {
        let globals = lua.globals();
        Ok(Self {
            xpcall: globals.get("xpcall")?,
            pcall: globals.get("pcall")?,
        })
    }

    /// Call `function` with `args`. On failure the error is rendered to text
    /// immediately, with a stack trace when `debug.traceback` is available.
    pub fn call(&self, lua: &Lua, function: &Function, args: MultiValue) -> Result<MultiValue, String> {
        let callee = Value::Function(function.clone());
        let outcome = match traceback_function(lua) {
            Some(handler) => {
                let packed = [callee, Value::Function(handler)].into_iter().chain(args);
                self.xpcall.call::<MultiValue>(MultiValue::from_iter(packed))
            }
            None => {
                let packed = std::iter::once(callee).chain(args);
                self.pcall.call::<MultiValue>(MultiValue::from_iter(packed))
            }
        };

        let mut values = outcome.map_err(|e| vm_error_text(&e))?.into_iter();
        match values.next() {
            Some(Value::Boolean(true)) => Ok(values.collect()),
            _ => Err(describe_error_value(lua, values.next())),
        }
    }
}

/// `debug.traceback`, if the debug library is loaded and intact.
fn traceback_function(lua: &Lua) -> Option<Function> {
    match resolve_path(&lua.globals(), "debug.traceback")? {
        ScriptValue::Callable(f) => Some(f),
        _ => None,
    }
}

fn describe_error_value(lua: &Lua, value: Option<Value>) -> String {
    match value {
        None | Some(Value::Nil) => String::new(),
        Some(Value::String(s)) => s.to_string_lossy(),
        Some(Value::Error(err)) => vm_error_text(&err),
        Some(other) => {
            let type_name = other.type_name();
            match lua.coerce_string(other) {
                Ok(Some(s)) => s.to_string_lossy(),
                _ => format!("(error object is a {type_name} value)"),
            }
        }
    }
}

/// Host state that a script run must not leak: the execution-context tag
/// and the note style. Both are put back when the scope drops, on every
/// exit path.
pub struct ExecutionScope<'a> {
    host: Option<&'a mut dyn ScriptHost>,
    saved_source: ActionSource,
    saved_style: NoteStyle,
}

impl<'a> ExecutionScope<'a> {
    /// Saves the host state and resets the note style to normal.
    pub fn enter(mut host: Option<&'a mut dyn ScriptHost>) -> Self {
        let (saved_source, saved_style) = match host.as_deref_mut() {
            Some(h) => {
                let saved = (h.action_source(), h.note_style());
                h.set_note_style(NoteStyle::NORMAL);
                saved
            }
            None => (ActionSource::Unknown, NoteStyle::NORMAL),
        };
        Self {
            host,
            saved_source,
            saved_style,
        }
    }

    /// Tag the run. `DontChange` leaves the current tag alone.
    pub fn set_action_source(&mut self, source: ActionSource) {
        if source == ActionSource::DontChange {
            return;
        }
        if let Some(h) = self.host.as_deref_mut() {
            h.set_action_source(source);
        }
    }

    /// The host, for reporting from inside the scope.
    pub fn host(&mut self) -> Option<&mut dyn ScriptHost> {
        self.host.as_mut().map(|h| &mut **h as &mut dyn ScriptHost)
    }
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        if let Some(h) = self.host.as_deref_mut() {
            h.set_action_source(self.saved_source);
            h.set_note_style(self.saved_style);
        }
    }
}
