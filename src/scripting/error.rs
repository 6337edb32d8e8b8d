/// `scripting/error.rs` — error taxonomy for the dispatch core
///
/// Every VM-level fault is turned into one of these before it reaches the
/// host. Nothing in this crate lets a Lua error unwind as a panic.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The engine has no live VM (never opened, or closed).
    #[error("script engine is not open")]
    Closed,

    /// A source buffer failed to load.
    #[error("compile error in {label}: {message}")]
    Compile { label: String, message: String },

    /// A protected call returned a failure.
    #[error("run-time error in {label}: {message}")]
    Runtime { label: String, message: String },

    /// A dispatch site named something that is missing or not callable.
    #[error("function '{name}' not found or not callable")]
    Resolution { name: String },

    /// A VM primitive failed outside a protected call (e.g. out of memory
    /// while building arguments).
    #[error("lua: {0}")]
    Vm(#[from] mlua::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Extract the VM's own diagnostic text from an `mlua` error, without the
/// "runtime error: " style decoration its `Display` impl adds.
pub fn vm_error_text(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) | mlua::Error::MemoryError(msg) => msg.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { traceback, cause } => {
            format!("{}\n{}", vm_error_text(cause), traceback)
        }
        other => other.to_string(),
    }
}
