/// `scripting/host.rs` — what the dispatch core needs from the host document
///
/// The host owns the console, the error-routing preferences, the execution
/// context tag and the timing counters. The engine only talks to it through
/// `ScriptHost`.
use std::io::{self, Write};
use std::time::Duration;

use mlua::Lua;
use serde::{Deserialize, Serialize};

/// RGB colour, `0xRRGGBB`.
pub type Colour = u32;

pub const SCRIPT_ERROR_FORE: Colour = 0xFF8C00; // darkorange
pub const SCRIPT_ERROR_BACK: Colour = 0x000000;

/// Where the currently running script was started from. Scripts that cause
/// side effects (sending, notes) are attributed by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    #[default]
    Unknown,
    Sandbox,
    UserTyping,
    TriggerFired,
    AliasFired,
    TimerFired,
    PluginCallback,
    Hotspot,
    /// Leave whatever tag is current untouched.
    DontChange,
}

/// Console note style flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteStyle(pub u16);

impl NoteStyle {
    pub const NORMAL: NoteStyle = NoteStyle(0);
    pub const BOLD: NoteStyle = NoteStyle(1);
    pub const UNDERLINE: NoteStyle = NoteStyle(2);
    pub const BLINK: NoteStyle = NoteStyle(4);
    pub const INVERSE: NoteStyle = NoteStyle(8);
}

pub trait ScriptHost {
    /// Diagnostic trace line (shown only when the host has tracing on).
    fn trace(&mut self, message: &str);

    /// Coloured text followed by a newline.
    fn colour_note(&mut self, fore: Colour, back: Colour, text: &str);

    /// Coloured text without a newline.
    fn colour_tell(&mut self, fore: Colour, back: Colour, text: &str);

    /// Highlight the source lines around `line` in the console.
    fn show_error_lines(&mut self, line: u32);

    /// Write the source lines around `line` to an error log.
    fn write_error_lines(&self, line: u32, out: &mut dyn Write) -> io::Result<()>;

    fn world_name(&self) -> &str;

    /// Name of the plugin whose script is running, if any.
    fn current_plugin(&self) -> Option<&str>;

    fn script_errors_to_output(&self) -> bool;

    /// Persisted preference; implementations mark the document modified.
    fn set_script_errors_to_output(&mut self, enabled: bool);

    fn log_script_errors(&self) -> bool;

    fn action_source(&self) -> ActionSource;
    fn set_action_source(&mut self, source: ActionSource);

    fn note_style(&self) -> NoteStyle;
    fn set_note_style(&mut self, style: NoteStyle);

    /// Add to the document's (and current plugin's) script time.
    fn add_script_time(&mut self, elapsed: Duration);

    /// Register the host's own script API. Runs before any library module.
    fn register_routines(&self, _lua: &Lua) -> mlua::Result<()> {
        Ok(())
    }
}

/// A console line captured by `BufferedHost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub fore: Colour,
    pub back: Colour,
    pub text: String,
}

/// Headless host: keeps console output, traces and timing in memory.
/// Source lines for error highlighting come from `source`.
#[derive(Debug, Default)]
pub struct BufferedHost {
    pub world: String,
    pub plugin: Option<String>,
    pub source: Vec<String>,
    pub errors_to_output: bool,
    pub log_errors: bool,
    pub modified: bool,
    pub console: Vec<ConsoleLine>,
    pub traces: Vec<String>,
    pub highlighted: Vec<u32>,
    pub action_source: ActionSource,
    pub note_style: NoteStyle,
    pub script_time: Duration,
    pending: String,
}

impl BufferedHost {
    pub fn new(world: impl Into<String>) -> Self {
        Self {
            world: world.into(),
            ..Default::default()
        }
    }

    /// Lines `line - 1 ..= line + 1` (1-based), numbered.
    fn context_lines(&self, line: u32) -> Vec<String> {
        let line = line as usize;
        let first = line.saturating_sub(1).max(1);
        (first..=line + 1)
            .filter_map(|n| self.source.get(n - 1).map(|text| format!("{n}: {text}")))
            .collect()
    }
}

impl ScriptHost for BufferedHost {
    fn trace(&mut self, message: &str) {
        self.traces.push(message.to_string());
    }

    fn colour_note(&mut self, fore: Colour, back: Colour, text: &str) {
        let mut full = std::mem::take(&mut self.pending);
        full.push_str(text);
        self.console.push(ConsoleLine { fore, back, text: full });
    }

    fn colour_tell(&mut self, _fore: Colour, _back: Colour, text: &str) {
        self.pending.push_str(text);
    }

    fn show_error_lines(&mut self, line: u32) {
        self.highlighted.push(line);
        for text in self.context_lines(line) {
            self.console.push(ConsoleLine {
                fore: SCRIPT_ERROR_FORE,
                back: SCRIPT_ERROR_BACK,
                text,
            });
        }
    }

    fn write_error_lines(&self, line: u32, out: &mut dyn Write) -> io::Result<()> {
        for text in self.context_lines(line) {
            writeln!(out, "{text}")?;
        }
        Ok(())
    }

    fn world_name(&self) -> &str {
        &self.world
    }

    fn current_plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    fn script_errors_to_output(&self) -> bool {
        self.errors_to_output
    }

    fn set_script_errors_to_output(&mut self, enabled: bool) {
        self.errors_to_output = enabled;
        self.modified = true;
    }

    fn log_script_errors(&self) -> bool {
        self.log_errors
    }

    fn action_source(&self) -> ActionSource {
        self.action_source
    }

    fn set_action_source(&mut self, source: ActionSource) {
        self.action_source = source;
    }

    fn note_style(&self) -> NoteStyle {
        self.note_style
    }

    fn set_note_style(&mut self, style: NoteStyle) {
        self.note_style = style;
    }

    fn add_script_time(&mut self, elapsed: Duration) {
        self.script_time += elapsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tell_then_note_is_one_line() {
        let mut host = BufferedHost::new("Test");
        host.colour_tell(1, 2, "Cannot open error log file: ");
        host.colour_note(1, 2, "/nowhere/log.txt");
        assert_eq!(host.console.len(), 1);
        assert_eq!(host.console[0].text, "Cannot open error log file: /nowhere/log.txt");
    }

    #[test]
    fn error_lines_clamp_to_source() {
        let mut host = BufferedHost::new("Test");
        host.source = vec!["a = 1".into(), "b = nil + 1".into()];
        let mut out = Vec::new();
        host.write_error_lines(2, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1: a = 1\n2: b = nil + 1\n");
    }

    #[test]
    fn routing_switch_marks_modified() {
        let mut host = BufferedHost::new("Test");
        host.set_script_errors_to_output(true);
        assert!(host.errors_to_output && host.modified);
    }
}
