/// `scripting/engine.rs` — the script engine session
///
/// `ScriptEngine` owns the single Lua VM of a host session, opens and closes
/// it as a unit, and dispatches host events (triggers, aliases, timers,
/// plugin callbacks) to named script functions. Script failures are caught,
/// reported, and mark the dispatch site as broken; they never reach the host
/// as a Rust error it has to unwind from.
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{Lua, MultiValue, Result as LuaResult};
use serde::Serialize;

use super::{
    api::{AuxLibrary, LibraryOpener, LibrarySet},
    config::EngineConfig,
    error::{vm_error_text, ScriptError},
    host::{ActionSource, ScriptHost},
    invoke::{ExecutionScope, ProtectedInvoker},
    marshal::{marshal_arguments, marshal_text},
    outcome::{interpret_scalar, interpret_text, Outcome, ScalarResult},
    registry::NameRegistry,
    report::{ErrorPresenter, FailureReporter, LogPresenter, EVENT_COMPILE_ERROR, EVENT_RUNTIME_ERROR},
    request::InvocationRequest,
    resolve::resolve_callable,
    sandbox::{apply_native_loading, create_vm, NativeLoading},
    token::{CacheToken, TokenState},
};

/// Installed on every open. Turns a non-OK host return code into an error
/// raised at the caller's line.
const CHECK_FUNCTION: &str = r#"
function check (result)
  if result ~= error_code.eOK then
    error (error_desc [result] or
           string.format ("Unknown error code: %i", result), 2)
  end
end
"#;

pub const CHECK_FUNCTION_LABEL: &str = "Check function";
pub const SANDBOX_LABEL: &str = "Sandbox";

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Calls that actually entered the VM.
    pub protected_calls: u64,
    pub runtime_errors: u64,
    pub compile_errors: u64,
    pub resolution_failures: u64,
    /// Dispatches short-circuited by a broken token.
    pub skipped: u64,
    pub script_time: Duration,
}

struct Vm {
    lua: Lua,
    invoker: ProtectedInvoker,
}

// ── ScriptEngine ──────────────────────────────────────────────────────────────

pub struct ScriptEngine<H: ScriptHost> {
    vm: Option<Vm>,
    host: Option<H>,
    config: EngineConfig,
    libraries: LibrarySet,
    names: Arc<NameRegistry>,
    reporter: FailureReporter,
    stats: EngineStats,
    /// Bumped on every open. Tokens settled in an older generation start over.
    generation: u64,
}

impl<H: ScriptHost> ScriptEngine<H> {
    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> EngineBuilder<H> {
        EngineBuilder::default()
    }

    // ── Host ──────────────────────────────────────────────────────────────

    /// Attach the host document. Returns the previously attached one.
    pub fn attach(&mut self, host: H) -> Option<H> {
        self.host.replace(host)
    }

    pub fn detach(&mut self) -> Option<H> {
        self.host.take()
    }

    pub fn host(&self) -> Option<&H> {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> Option<&mut H> {
        self.host.as_mut()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Callable and flag-table names, for completion and help.
    pub fn names(&self) -> &NameRegistry {
        &self.names
    }

    pub fn is_open(&self) -> bool {
        self.vm.is_some()
    }

    /// The live VM, for hosts that register extra routines after open.
    pub fn lua(&self) -> Option<&Lua> {
        self.vm.as_ref().map(|vm| &vm.lua)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Create the VM, load libraries, fill the name registry (first open in
    /// the process only), lock down native loading, install `check` and run
    /// the sandbox script. Opening an open engine does nothing.
    pub fn open(&mut self) -> Result<(), ScriptError> {
        if self.vm.is_some() {
            return Ok(());
        }

        let lua = create_vm();
        if let Some(host) = self.host.as_ref() {
            host.register_routines(&lua)?;
        }
        self.libraries.open_all(&lua)?;
        self.names.populate(&lua);
        apply_native_loading(&lua, NativeLoading::from_flag(self.config.allow_native_libraries))?;
        self.libraries.install_preloads(&lua)?;
        let invoker = ProtectedInvoker::capture(&lua)?;
        self.vm = Some(Vm { lua, invoker });
        self.generation += 1;
        log::info!("[scripting] engine opened");

        // Failures below are reported through the usual channels and do not
        // stop the engine from opening.
        let _ = self.execute(CHECK_FUNCTION, CHECK_FUNCTION_LABEL);

        if let Some(script) = self.config.sandbox_script.clone() {
            if let Some(vm) = self.vm.as_ref() {
                let mut scope = ExecutionScope::enter(host_dyn(&mut self.host));
                scope.set_action_source(ActionSource::Sandbox);
                let _ = run_chunk(
                    vm,
                    scope.host(),
                    &mut self.reporter,
                    &mut self.stats,
                    &script,
                    SANDBOX_LABEL,
                );
            }
        }
        Ok(())
    }

    /// Destroy the VM. The engine itself stays usable and can be reopened.
    pub fn close(&mut self) {
        if self.vm.take().is_some() {
            log::info!("[scripting] engine closed");
        }
    }

    /// Close and reopen. Tokens broken before the reset become unresolved
    /// the next time they are dispatched.
    pub fn reset(&mut self) -> Result<(), ScriptError> {
        self.close();
        self.open()
    }

    // ── Execution ─────────────────────────────────────────────────────────

    /// Load `code` under `label` and run it with no arguments.
    pub fn execute(&mut self, code: &str, label: &str) -> Result<(), ScriptError> {
        let Some(vm) = self.vm.as_ref() else {
            return Err(ScriptError::Closed);
        };
        run_chunk(
            vm,
            host_dyn(&mut self.host),
            &mut self.reporter,
            &mut self.stats,
            code,
            label,
        )
    }

    /// Probe whether `name` is currently callable, for a new dispatch site.
    pub fn resolve_token(&self, name: &str) -> CacheToken {
        let found = self
            .vm
            .as_ref()
            .and_then(|vm| resolve_callable(&vm.lua.globals(), name))
            .is_some();
        let state = if found {
            TokenState::Resolved
        } else {
            TokenState::Broken
        };
        CacheToken::from_state(state, self.generation)
    }

    /// Call `request.procedure` with the request's full argument list.
    ///
    /// `Ok(Skipped)` when the engine is closed or the token is broken. On a
    /// failure the token is broken, the failure has been reported, and the
    /// error is returned. When the request asks for a result, the first
    /// return value is interpreted as a scalar.
    pub fn dispatch(
        &mut self,
        token: &mut CacheToken,
        request: &InvocationRequest,
        invocations: &mut u64,
    ) -> Result<Outcome<Option<ScalarResult>>, ScriptError> {
        let values = match self.call_site(token, request, |lua| marshal_arguments(lua, request), invocations)? {
            Outcome::Skipped => return Ok(Outcome::Skipped),
            Outcome::Invoked(values) => values,
        };
        let result = match (&self.vm, request.want_result) {
            (Some(vm), true) => Some(interpret_scalar(&vm.lua, &values)),
            _ => None,
        };
        Ok(Outcome::Invoked(result))
    }

    /// Call `request.procedure` with `text` as its only argument and return
    /// the string it gives back, if any, byte for byte. The request's own
    /// scalars and payloads are not used.
    pub fn dispatch_text(
        &mut self,
        token: &mut CacheToken,
        request: &InvocationRequest,
        text: &[u8],
        invocations: &mut u64,
    ) -> Result<Outcome<Option<Vec<u8>>>, ScriptError> {
        let values = match self.call_site(token, request, |lua| marshal_text(lua, text), invocations)? {
            Outcome::Skipped => return Ok(Outcome::Skipped),
            Outcome::Invoked(values) => values,
        };
        let text = self.vm.as_ref().and_then(|vm| interpret_text(&vm.lua, &values));
        Ok(Outcome::Invoked(text))
    }

    fn call_site<F>(
        &mut self,
        token: &mut CacheToken,
        request: &InvocationRequest,
        marshal: F,
        invocations: &mut u64,
    ) -> Result<Outcome<MultiValue>, ScriptError>
    where
        F: FnOnce(&Lua) -> LuaResult<MultiValue>,
    {
        let Some(vm) = self.vm.as_ref() else {
            return Ok(Outcome::Skipped);
        };
        token.sync(self.generation);
        if token.is_broken() {
            self.stats.skipped += 1;
            return Ok(Outcome::Skipped);
        }

        if self.config.trace_dispatch {
            if let Some(host) = self.host.as_mut() {
                host.trace(&format!("Executing {} script \"{}\"", request.kind, request.procedure));
            }
        }
        let started = Instant::now();

        let mut scope = ExecutionScope::enter(host_dyn(&mut self.host));

        let Some(function) = resolve_callable(&vm.lua.globals(), &request.procedure) else {
            drop(scope);
            token.mark_broken();
            self.stats.resolution_failures += 1;
            log::warn!(
                "[scripting] {} '{}': function not found, disabling",
                request.kind,
                request.procedure
            );
            return Err(ScriptError::Resolution {
                name: request.procedure.clone(),
            });
        };
        token.mark_resolved();

        let call = match marshal(&vm.lua) {
            Ok(args) => {
                scope.set_action_source(request.source);
                self.stats.protected_calls += 1;
                vm.invoker.call(&vm.lua, &function, args)
            }
            Err(e) => Err(vm_error_text(&e)),
        };
        drop(scope);

        match call {
            Ok(values) => {
                *invocations += 1;
                let elapsed = started.elapsed();
                self.stats.script_time += elapsed;
                if let Some(host) = self.host.as_mut() {
                    host.add_script_time(elapsed);
                }
                Ok(Outcome::Invoked(values))
            }
            Err(message) => {
                token.mark_broken();
                self.stats.runtime_errors += 1;
                let context = request.context();
                self.reporter.report(
                    host_dyn(&mut self.host),
                    EVENT_RUNTIME_ERROR,
                    Some(&context),
                    message.clone(),
                );
                Err(ScriptError::Runtime {
                    label: request.procedure.clone(),
                    message,
                })
            }
        }
    }
}

fn host_dyn<H: ScriptHost>(host: &mut Option<H>) -> Option<&mut dyn ScriptHost> {
    host.as_mut().map(|h| h as &mut dyn ScriptHost)
}

/// Compile then run one chunk. Compile errors never reach the invoker.
fn run_chunk(
    vm: &Vm,
    mut host: Option<&mut dyn ScriptHost>,
    reporter: &mut FailureReporter,
    stats: &mut EngineStats,
    code: &str,
    label: &str,
) -> Result<(), ScriptError> {
    let started = Instant::now();

    let function = match vm.lua.load(code).set_name(label).into_function() {
        Ok(f) => f,
        Err(e) => {
            let message = vm_error_text(&e);
            stats.compile_errors += 1;
            reporter.report(host, EVENT_COMPILE_ERROR, None, message.clone());
            return Err(ScriptError::Compile {
                label: label.to_string(),
                message,
            });
        }
    };

    stats.protected_calls += 1;
    if let Err(message) = vm.invoker.call(&vm.lua, &function, MultiValue::new()) {
        stats.runtime_errors += 1;
        reporter.report(host, EVENT_RUNTIME_ERROR, None, message.clone());
        return Err(ScriptError::Runtime {
            label: label.to_string(),
            message,
        });
    }

    let elapsed = started.elapsed();
    stats.script_time += elapsed;
    if let Some(h) = host.as_deref_mut() {
        h.add_script_time(elapsed);
    }
    Ok(())
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct EngineBuilder<H: ScriptHost> {
    config: EngineConfig,
    host: Option<H>,
    presenter: Option<Box<dyn ErrorPresenter>>,
    libraries: LibrarySet,
    names: Option<Arc<NameRegistry>>,
}

impl<H: ScriptHost> Default for EngineBuilder<H> {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            host: None,
            presenter: None,
            libraries: LibrarySet::default(),
            names: None,
        }
    }
}

impl<H: ScriptHost> EngineBuilder<H> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: H) -> Self {
        self.host = Some(host);
        self
    }

    /// Modal error display. Defaults to `LogPresenter`.
    pub fn presenter(mut self, presenter: impl ErrorPresenter + 'static) -> Self {
        self.presenter = Some(Box::new(presenter));
        self
    }

    pub fn library(mut self, library: AuxLibrary, opener: LibraryOpener) -> Self {
        self.libraries.insert(library, opener);
        self
    }

    pub fn preload(mut self, name: impl Into<String>, opener: LibraryOpener) -> Self {
        self.libraries.preload(name, opener);
        self
    }

    /// Use a private name registry instead of the process-wide one.
    pub fn names(mut self, names: Arc<NameRegistry>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn build(self) -> ScriptEngine<H> {
        let presenter = self.presenter.unwrap_or_else(|| Box::new(LogPresenter));
        ScriptEngine {
            vm: None,
            host: self.host,
            reporter: FailureReporter::new(presenter, self.config.error_log_path()),
            config: self.config,
            libraries: self.libraries,
            names: self.names.unwrap_or_else(NameRegistry::shared),
            stats: EngineStats::default(),
            generation: 0,
        }
    }
}
