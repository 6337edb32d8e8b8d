/// `scripting/request.rs` — host event data handed to a script callable
///
/// Triggers, aliases, timers and plugin callbacks all describe their call as
/// an `InvocationRequest`: scalars plus at most one of each `Payload` kind.
use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::host::{ActionSource, Colour};

// ── Regex captures ────────────────────────────────────────────────────────────

/// What the dispatch core needs from a regular-expression engine's match.
pub trait CaptureSource {
    /// Number of capture groups, not counting group 0.
    fn capture_count(&self) -> usize;

    /// Text of group `index`, `None` when the group did not take part.
    fn capture(&self, index: usize) -> Option<&str>;

    /// Name table in pattern order. Indices come from the engine and are
    /// not guaranteed to be in range.
    fn name_table(&self) -> Vec<(String, i64)>;

    /// The pattern was compiled with duplicate group names allowed.
    fn allows_duplicate_names(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCapture {
    pub name: String,
    pub index: i64,
}

/// Owned snapshot of one regex match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureSet {
    /// Index 0 is the whole match.
    pub groups: Vec<Option<String>>,
    pub names: Vec<NamedCapture>,
    pub duplicate_names: bool,
}

impl CaptureSet {
    pub fn from_source(source: &dyn CaptureSource) -> Self {
        let groups = (0..=source.capture_count())
            .map(|i| source.capture(i).map(str::to_owned))
            .collect();
        let names = source
            .name_table()
            .into_iter()
            .map(|(name, index)| NamedCapture { name, index })
            .collect();
        Self {
            groups,
            names,
            duplicate_names: source.allows_duplicate_names(),
        }
    }

    pub fn from_regex(regex: &Regex, captures: &Captures<'_>) -> Self {
        Self::from_source(&RegexCaptures { regex, captures })
    }

    /// Highest valid group index.
    pub fn capture_count(&self) -> usize {
        self.groups.len().saturating_sub(1)
    }

    /// `Some(Some(text))` matched, `Some(None)` unmatched, `None` out of range.
    pub fn group(&self, index: i64) -> Option<Option<&str>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.groups.get(i))
            .map(|g| g.as_deref())
    }
}

struct RegexCaptures<'a, 'h> {
    regex: &'a Regex,
    captures: &'a Captures<'h>,
}

impl CaptureSource for RegexCaptures<'_, '_> {
    fn capture_count(&self) -> usize {
        self.captures.len().saturating_sub(1)
    }

    fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).map(|m| m.as_str())
    }

    fn name_table(&self) -> Vec<(String, i64)> {
        self.regex
            .capture_names()
            .enumerate()
            .filter_map(|(i, name)| name.map(|n| (n.to_string(), i as i64)))
            .collect()
    }
}

// ── Styled line ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRun {
    pub text: String,
    pub fore: Colour,
    pub back: Colour,
    pub style: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyledLine {
    pub runs: Vec<StyleRun>,
}

impl StyledLine {
    pub fn push(&mut self, text: impl Into<String>, fore: Colour, back: Colour, style: u16) {
        self.runs.push(StyleRun {
            text: text.into(),
            fore,
            back,
            style,
        });
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Structured argument following the scalars. Marshaled in `rank` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Captures(CaptureSet),
    Fields(BTreeMap<String, String>),
    StyledLine(StyledLine),
}

impl Payload {
    pub fn rank(&self) -> u8 {
        match self {
            Payload::Captures(_) => 0,
            Payload::Fields(_) => 1,
            Payload::StyledLine(_) => 2,
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// Who asked for the call, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub procedure: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Callable name, possibly dotted.
    pub procedure: String,
    pub source: ActionSource,
    /// e.g. "trigger", "alias".
    pub kind: String,
    /// e.g. "trigger subroutine my_trigger".
    pub reason: String,
    pub numbers: Vec<f64>,
    pub strings: Vec<String>,
    payloads: Vec<Payload>,
    pub want_result: bool,
}

impl InvocationRequest {
    pub fn new(procedure: impl Into<String>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            source: ActionSource::DontChange,
            kind: kind.into(),
            reason: reason.into(),
            numbers: Vec::new(),
            strings: Vec::new(),
            payloads: Vec::new(),
            want_result: false,
        }
    }

    pub fn source(mut self, source: ActionSource) -> Self {
        self.source = source;
        self
    }

    pub fn number(mut self, n: f64) -> Self {
        self.numbers.push(n);
        self
    }

    pub fn string(mut self, s: impl Into<String>) -> Self {
        self.strings.push(s.into());
        self
    }

    /// Adds a payload, replacing any earlier one of the same kind.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payloads.retain(|p| p.rank() != payload.rank());
        self.payloads.push(payload);
        self.payloads.sort_by_key(Payload::rank);
        self
    }

    pub fn captures(self, captures: CaptureSet) -> Self {
        self.payload(Payload::Captures(captures))
    }

    pub fn fields(self, fields: BTreeMap<String, String>) -> Self {
        self.payload(Payload::Fields(fields))
    }

    pub fn styled_line(self, line: StyledLine) -> Self {
        self.payload(Payload::StyledLine(line))
    }

    pub fn with_result(mut self) -> Self {
        self.want_result = true;
        self
    }

    /// Payloads in marshaling order.
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn argument_count(&self) -> usize {
        self.numbers.len() + self.strings.len() + self.payloads.len()
    }

    pub fn context(&self) -> CallContext {
        CallContext {
            procedure: self.procedure.clone(),
            kind: self.kind.clone(),
            reason: self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_kept_in_rank_order() {
        let mut line = StyledLine::default();
        line.push("hi", 0xFFFFFF, 0, 0);
        let req = InvocationRequest::new("f", "trigger", "test")
            .styled_line(line)
            .fields(BTreeMap::new())
            .captures(CaptureSet::default());
        let ranks: Vec<u8> = req.payloads().iter().map(Payload::rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn same_kind_payload_replaces() {
        let mut first = BTreeMap::new();
        first.insert("a".to_string(), "1".to_string());
        let req = InvocationRequest::new("f", "alias", "test")
            .fields(first)
            .fields(BTreeMap::new());
        assert_eq!(req.payloads(), &[Payload::Fields(BTreeMap::new())]);
    }

    #[test]
    fn argument_count_sums_scalars_and_payloads() {
        let req = InvocationRequest::new("f", "timer", "test")
            .number(1.0)
            .number(2.0)
            .string("x")
            .captures(CaptureSet::default());
        assert_eq!(req.argument_count(), 4);
    }

    #[test]
    fn regex_captures_snapshot() {
        let re = Regex::new(r"(?<who>\w+) says (\d+)( loudly)?").unwrap();
        let caps = re.captures("Nick says 42").unwrap();
        let set = CaptureSet::from_regex(&re, &caps);
        assert_eq!(set.capture_count(), 3);
        assert_eq!(set.group(0), Some(Some("Nick says 42")));
        assert_eq!(set.group(1), Some(Some("Nick")));
        assert_eq!(set.group(3), Some(None));
        assert_eq!(set.group(4), None);
        assert_eq!(set.group(-1), None);
        assert_eq!(
            set.names,
            vec![NamedCapture {
                name: "who".into(),
                index: 1
            }]
        );
        assert!(!set.duplicate_names);
    }
}
