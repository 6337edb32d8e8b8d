//! Lua scripting dispatch core for a MUD client.
//!
//! A host document (a "world") owns one [`ScriptEngine`]. The engine opens a
//! Lua VM, loads the auxiliary libraries, and dispatches trigger, alias,
//! timer and plugin callbacks to named script functions. Each dispatch site
//! keeps a [`CacheToken`] so a function that is missing or has failed once is
//! not called again until the engine is reset.
//!
//! ```no_run
//! use script_dispatch::{BufferedHost, CacheToken, InvocationRequest, ScriptEngine};
//!
//! let mut engine = ScriptEngine::builder().host(BufferedHost::new("Aardwolf")).build();
//! engine.open()?;
//! engine.execute("function on_hit(name) print(name) end", "Script file")?;
//!
//! let mut token = CacheToken::new();
//! let mut hits = 0;
//! let request = InvocationRequest::new("on_hit", "trigger", "trigger subroutine hit")
//!     .string("hit_trigger");
//! engine.dispatch(&mut token, &request, &mut hits)?;
//! # Ok::<(), script_dispatch::ScriptError>(())
//! ```
pub mod scripting;

pub use scripting::*;
