/// `scripting/sandbox.rs` — VM creation and native-code lockdown
///
/// The VM gets the full standard library, `debug` included, because the
/// protected invoker relies on `debug.traceback`. What scripts must not do
/// by default is load native code, so `package.loadlib` and the C searchers
/// are removed unless the configuration opts in.
use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value};

/// Controls whether scripts may load native (C) modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NativeLoading {
    /// Default: `package.loadlib`, `package.cpath` and the C searchers are gone
    #[default]
    Disabled,
    /// Only for trusted installations
    Allowed,
}

impl NativeLoading {
    pub fn from_flag(allow: bool) -> Self {
        if allow {
            Self::Allowed
        } else {
            Self::Disabled
        }
    }
}

/// Creates a new Lua VM with every standard library loaded.
pub fn create_vm() -> Lua {
    // SAFETY: `debug` is the only unsafe library we need; native loading is
    // locked down separately by `apply_native_loading`.
    unsafe { Lua::unsafe_new_with(StdLib::ALL, LuaOptions::default()) }
}

pub fn apply_native_loading(lua: &Lua, policy: NativeLoading) -> LuaResult<()> {
    if policy == NativeLoading::Allowed {
        return Ok(());
    }
    let package = match lua.globals().get::<Value>("package")? {
        Value::Table(t) => t,
        _ => return Ok(()),
    };
    package.set("loadlib", Value::Nil)?;
    package.set("cpath", "")?;
    if let Value::Table(searchers) = package.get::<Value>("searchers")? {
        remove_c_searchers(&searchers)?;
    }
    log::debug!("[scripting] native module loading disabled");
    Ok(())
}

/// Searchers 3 and 4 are the C library and all-in-one loaders.
fn remove_c_searchers(searchers: &Table) -> LuaResult<()> {
    let len = searchers.raw_len();
    for index in (3..=len.min(4)).rev() {
        searchers.raw_remove(index)?;
    }
    Ok(())
}
