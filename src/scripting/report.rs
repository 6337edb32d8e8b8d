/// `scripting/report.rs` — turning a script failure into something the user sees
///
/// A failure goes to a modal presenter (default) or to the host console
/// (when the host opted in), and independently to the append-only error log
/// when the host has error logging on.
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::host::{ScriptHost, SCRIPT_ERROR_BACK, SCRIPT_ERROR_FORE};
use super::request::CallContext;

pub const EVENT_COMPILE_ERROR: &str = "Compile error";
pub const EVENT_RUNTIME_ERROR: &str = "Run-time error";

/// Chunk names that map back to editable source files.
const LINE_ATTRIBUTABLE_PREFIXES: [&str; 2] = ["[string \"Plugin\"]:", "[string \"Script file\"]:"];

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub event: String,
    pub context: Option<CallContext>,
    pub raised_by: String,
    pub called_by: String,
    pub description: String,
    /// 1-based source line, when the error came from a plugin or script file.
    pub line: Option<u32>,
    pub timestamp: DateTime<Local>,
}

impl FailureRecord {
    pub fn new(
        event: &str,
        context: Option<&CallContext>,
        description: String,
        host: Option<&dyn ScriptHost>,
    ) -> Self {
        Self {
            event: event.to_string(),
            context: context.cloned(),
            raised_by: raised_by(host),
            called_by: called_by(context),
            line: parse_error_line(&description),
            description,
            timestamp: Local::now(),
        }
    }

    pub fn is_line_attributable(&self) -> bool {
        self.line.is_some()
    }
}

fn raised_by(host: Option<&dyn ScriptHost>) -> String {
    match host {
        None => "No active world".to_string(),
        Some(h) => match h.current_plugin() {
            Some(plugin) => format!("Plugin: {plugin} (called from world: {})", h.world_name()),
            None => format!("World: {}", h.world_name()),
        },
    }
}

fn called_by(context: Option<&CallContext>) -> String {
    match context {
        Some(ctx) if !ctx.procedure.is_empty() => format!(
            "Function/Sub: {} called by {}\nReason: {}",
            ctx.procedure, ctx.kind, ctx.reason
        ),
        _ => "Immediate execution".to_string(),
    }
}

/// Line number from `[string "Plugin"]:12: ...` style messages. A recognised
/// prefix without digits yields line 0, as the host expects.
pub fn parse_error_line(err: &str) -> Option<u32> {
    let rest = LINE_ATTRIBUTABLE_PREFIXES
        .iter()
        .find_map(|prefix| err.strip_prefix(prefix))?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    Some(digits.parse().unwrap_or(0))
}

/// Modal error display. Blocks until the user dismisses it.
pub trait ErrorPresenter {
    /// `have_host` is false when no world is attached. Returns true if the
    /// user asked for future errors to go to the output window instead.
    fn present(&mut self, record: &FailureRecord, have_host: bool) -> bool;
}

/// Presenter for headless hosts: writes the dialog contents to the log.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl ErrorPresenter for LogPresenter {
    fn present(&mut self, record: &FailureRecord, _have_host: bool) -> bool {
        log::error!(
            "[scripting] {} | {} | {} | {}",
            record.event,
            record.raised_by,
            record.called_by.replace('\n', " "),
            record.description
        );
        false
    }
}

pub struct FailureReporter {
    presenter: Box<dyn ErrorPresenter>,
    log_path: PathBuf,
}

impl FailureReporter {
    pub fn new(presenter: Box<dyn ErrorPresenter>, log_path: PathBuf) -> Self {
        Self { presenter, log_path }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    pub fn report(
        &mut self,
        host: Option<&mut dyn ScriptHost>,
        event: &str,
        context: Option<&CallContext>,
        description: String,
    ) -> FailureRecord {
        let record = FailureRecord::new(event, context, description, host.as_deref());
        log::debug!("[scripting] {}: {}", record.event, record.description);

        let Some(host) = host else {
            self.presenter.present(&record, false);
            return record;
        };

        if host.script_errors_to_output() {
            for text in [&record.event, &record.raised_by, &record.called_by, &record.description] {
                host.colour_note(SCRIPT_ERROR_FORE, SCRIPT_ERROR_BACK, text);
            }
            if let Some(line) = record.line {
                host.show_error_lines(line);
            }
        } else if self.presenter.present(&record, true) {
            host.set_script_errors_to_output(true);
        }

        if host.log_script_errors() {
            self.append_to_log(host, &record);
        }

        record
    }

    fn append_to_log(&self, host: &mut dyn ScriptHost, record: &FailureRecord) {
        let file = OpenOptions::new().create(true).append(true).open(&self.log_path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[scripting] cannot open {}: {e}", self.log_path.display());
                host.colour_tell(SCRIPT_ERROR_FORE, SCRIPT_ERROR_BACK, "Cannot open error log file: ");
                host.colour_note(
                    SCRIPT_ERROR_FORE,
                    SCRIPT_ERROR_BACK,
                    &self.log_path.display().to_string(),
                );
                return;
            }
        };
        if let Err(e) = write_log_block(&mut file, &*host, record) {
            log::warn!("[scripting] writing {} failed: {e}", self.log_path.display());
        }
    }
}

fn write_log_block(out: &mut dyn Write, host: &dyn ScriptHost, record: &FailureRecord) -> io::Result<()> {
    write!(
        out,
        "\n\n--- Scripting error on {} ---\n\n",
        record.timestamp.format("%A, %B %d, %Y, %-I:%M %p")
    )?;
    writeln!(out, "{}", record.event)?;
    writeln!(out, "{}", record.raised_by)?;
    writeln!(out, "{}", record.called_by)?;
    writeln!(out, "{}", record.description)?;
    if let Some(line) = record.line {
        host.write_error_lines(line, out)?;
    }
    Ok(())
}
