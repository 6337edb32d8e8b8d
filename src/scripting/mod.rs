/// `scripting/` — Lua scripting dispatch core
///
/// One Lua VM per host session, owned by `ScriptEngine`.
/// Host events are dispatched to named script functions through cache tokens.
/// Script errors are caught and reported, never propagated as panics.
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod invoke;
pub mod marshal;
pub mod outcome;
pub mod registry;
pub mod report;
pub mod request;
pub mod resolve;
pub mod sandbox;
pub mod token;

pub use api::{AuxLibrary, LibraryOpener};
pub use config::EngineConfig;
pub use engine::{EngineBuilder, EngineStats, ScriptEngine};
pub use error::ScriptError;
pub use host::{ActionSource, BufferedHost, Colour, NoteStyle, ScriptHost};
pub use outcome::{Outcome, ScalarResult};
pub use registry::NameRegistry;
pub use report::{ErrorPresenter, FailureRecord, LogPresenter};
pub use request::{CaptureSet, CaptureSource, InvocationRequest, StyleRun, StyledLine};
pub use token::{CacheToken, TokenState};
