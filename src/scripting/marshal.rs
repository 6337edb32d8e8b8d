/// `scripting/marshal.rs` — builds the positional argument list for a call
///
/// Layout (callables depend on it):
///   numbers..., strings..., [captures], [fields], [styled line]
use std::collections::HashSet;

use mlua::{Lua, MultiValue, Result as LuaResult, Table, Value};

use super::request::{CaptureSet, InvocationRequest, Payload, StyledLine};

/// Marshal every argument of `request`, in order.
pub fn marshal_arguments(lua: &Lua, request: &InvocationRequest) -> LuaResult<MultiValue> {
    let mut args = Vec::with_capacity(request.argument_count());

    args.extend(request.numbers.iter().map(|n| Value::Number(*n)));
    for s in &request.strings {
        args.push(Value::String(lua.create_string(s)?));
    }

    for payload in request.payloads() {
        let table = match payload {
            Payload::Captures(set) => capture_table(lua, set)?,
            Payload::Fields(fields) => {
                let t = lua.create_table_with_capacity(0, fields.len())?;
                for (k, v) in fields {
                    t.raw_set(k.as_str(), v.as_str())?;
                }
                t
            }
            Payload::StyledLine(line) => style_table(lua, line)?,
        };
        args.push(Value::Table(table));
    }

    Ok(MultiValue::from_iter(args))
}

/// A lone string argument, for text-transform callbacks. The bytes are
/// passed through as-is, so non-UTF-8 world text survives.
pub fn marshal_text(lua: &Lua, text: &[u8]) -> LuaResult<MultiValue> {
    Ok(MultiValue::from_iter([Value::String(lua.create_string(text)?)]))
}

/// Groups `0..=n` by index, then names layered on top. An unmatched group is
/// `false`, never `""`.
fn capture_table(lua: &Lua, set: &CaptureSet) -> LuaResult<Table> {
    let t = lua.create_table_with_capacity(set.groups.len(), set.names.len())?;

    for (i, group) in set.groups.iter().enumerate() {
        t.raw_set(i, capture_value(lua, group.as_deref())?)?;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for entry in &set.names {
        let group = set.group(entry.index);
        // A later duplicate is skipped only when its index is out of range.
        if set.duplicate_names && !seen.insert(entry.name.as_str()) && group.is_none() {
            continue;
        }
        let value = match group {
            Some(g) => capture_value(lua, g)?,
            None => Value::Nil,
        };
        t.raw_set(entry.name.as_str(), value)?;
    }

    Ok(t)
}

fn capture_value(lua: &Lua, group: Option<&str>) -> LuaResult<Value> {
    Ok(match group {
        Some(text) => Value::String(lua.create_string(text)?),
        None => Value::Boolean(false),
    })
}

/// `{ {text=, length=, textcolour=, backcolour=, style=}, ... }`, 1-based.
fn style_table(lua: &Lua, line: &StyledLine) -> LuaResult<Table> {
    let t = lua.create_table_with_capacity(line.runs.len(), 0)?;
    for (i, run) in line.runs.iter().enumerate() {
        let r = lua.create_table_with_capacity(0, 5)?;
        r.raw_set("text", run.text.as_str())?;
        r.raw_set("length", run.text.chars().count())?;
        r.raw_set("textcolour", run.fore)?;
        r.raw_set("backcolour", run.back)?;
        r.raw_set("style", run.style)?;
        t.raw_set(i + 1, r)?;
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::scripting::request::{CaptureSource, NamedCapture};

    /// Echoes argument count and positional types as "n:number,string,...".
    const ECHO: &str = r#"
        return function(...)
            local n = select('#', ...)
            local types = {}
            for i = 1, n do types[i] = type((select(i, ...))) end
            return n .. ":" .. table.concat(types, ",")
        end
    "#;

    fn echo(lua: &Lua, args: MultiValue) -> String {
        let f: mlua::Function = lua.load(ECHO).eval().unwrap();
        f.call::<String>(args).unwrap()
    }

    struct DupSource;

    impl CaptureSource for DupSource {
        fn capture_count(&self) -> usize {
            2
        }

        fn capture(&self, index: usize) -> Option<&str> {
            match index {
                0 => Some("Kobold attacks"),
                1 => Some("Kobold"),
                _ => None,
            }
        }

        fn name_table(&self) -> Vec<(String, i64)> {
            vec![("mob".into(), 1), ("mob".into(), 2), ("mob".into(), 9)]
        }

        fn allows_duplicate_names(&self) -> bool {
            true
        }
    }

    #[test]
    fn scalars_then_payloads_in_fixed_order() {
        let lua = Lua::new();
        let mut line = StyledLine::default();
        line.push("x", 1, 2, 0);
        let req = InvocationRequest::new("f", "trigger", "t")
            .string("s1")
            .number(1.0)
            .styled_line(line)
            .string("s2")
            .captures(CaptureSet::default())
            .number(2.0)
            .fields(BTreeMap::new());
        let args = marshal_arguments(&lua, &req).unwrap();
        assert_eq!(
            echo(&lua, args),
            "7:number,number,string,string,table,table,table"
        );
    }

    #[test]
    fn values_keep_caller_order() {
        let lua = Lua::new();
        let req = InvocationRequest::new("f", "trigger", "t")
            .number(3.0)
            .number(1.5)
            .string("a")
            .string("b");
        let args = marshal_arguments(&lua, &req).unwrap();
        let f: mlua::Function = lua
            .load("return function(a, b, c, d) return a .. '|' .. b .. '|' .. c .. '|' .. d end")
            .eval()
            .unwrap();
        assert_eq!(f.call::<String>(args).unwrap(), "3.0|1.5|a|b");
    }

    #[test]
    fn unmatched_group_is_false_and_names_alias_indices() {
        let lua = Lua::new();
        let re = regex::Regex::new(r"(?<who>\w+) says(?<how> loudly)?").unwrap();
        let caps = re.captures("Nick says").unwrap();
        let set = CaptureSet::from_regex(&re, &caps);
        let t = capture_table(&lua, &set).unwrap();
        assert_eq!(t.raw_get::<String>(0).unwrap(), "Nick says");
        assert_eq!(t.raw_get::<String>(1).unwrap(), "Nick");
        assert_eq!(t.raw_get::<Value>(2).unwrap(), Value::Boolean(false));
        assert_eq!(t.raw_get::<String>("who").unwrap(), "Nick");
        assert_eq!(t.raw_get::<Value>("how").unwrap(), Value::Boolean(false));
    }

    #[test]
    fn in_range_duplicate_overwrites_out_of_range_is_skipped() {
        let lua = Lua::new();
        let set = CaptureSet::from_source(&DupSource);
        let t = capture_table(&lua, &set).unwrap();
        // mob -> 1 ("Kobold"), then mob -> 2 (unmatched, in range) replaces
        // it; mob -> 9 is out of range and ignored.
        assert_eq!(t.raw_get::<Value>("mob").unwrap(), Value::Boolean(false));
    }

    #[test]
    fn out_of_range_duplicate_keeps_earlier_match() {
        let lua = Lua::new();
        let set = CaptureSet {
            groups: vec![Some("Kobold attacks".into()), Some("Kobold".into())],
            names: vec![
                NamedCapture { name: "mob".into(), index: 1 },
                NamedCapture { name: "mob".into(), index: 5 },
            ],
            duplicate_names: true,
        };
        let t = capture_table(&lua, &set).unwrap();
        assert_eq!(t.raw_get::<String>("mob").unwrap(), "Kobold");
    }

    #[test]
    fn duplicate_filtering_needs_the_pattern_flag() {
        let lua = Lua::new();
        let mut set = CaptureSet::from_source(&DupSource);
        set.duplicate_names = false;
        let t = capture_table(&lua, &set).unwrap();
        // Without the flag the last entry (out of range) wins.
        assert_eq!(t.raw_get::<Value>("mob").unwrap(), Value::Nil);
    }

    #[test]
    fn later_duplicate_fills_an_unmatched_name() {
        let lua = Lua::new();
        let set = CaptureSet {
            groups: vec![Some("b".into()), None, Some("b".into())],
            names: vec![
                NamedCapture { name: "x".into(), index: 1 },
                NamedCapture { name: "x".into(), index: 2 },
            ],
            duplicate_names: true,
        };
        let t = capture_table(&lua, &set).unwrap();
        assert_eq!(t.raw_get::<String>("x").unwrap(), "b");
    }

    #[test]
    fn fields_become_string_pairs() {
        let lua = Lua::new();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "my_timer".to_string());
        fields.insert("group".to_string(), "combat".to_string());
        let req = InvocationRequest::new("f", "timer", "t").fields(fields);
        let mut args = marshal_arguments(&lua, &req).unwrap().into_iter();
        let Some(Value::Table(t)) = args.next() else {
            panic!("expected table")
        };
        assert_eq!(t.get::<String>("name").unwrap(), "my_timer");
        assert_eq!(t.get::<String>("group").unwrap(), "combat");
    }

    #[test]
    fn style_runs_are_one_based_with_lengths() {
        let lua = Lua::new();
        let mut line = StyledLine::default();
        line.push("You see ", 0xC0C0C0, 0, 0);
        line.push("a café", 0xFF0000, 0, 1);
        let t = style_table(&lua, &line).unwrap();
        assert_eq!(t.raw_len(), 2);
        let second: Table = t.raw_get(2).unwrap();
        assert_eq!(second.get::<String>("text").unwrap(), "a café");
        assert_eq!(second.get::<i64>("length").unwrap(), 6);
        assert_eq!(second.get::<u32>("textcolour").unwrap(), 0xFF0000);
        assert_eq!(second.get::<u32>("backcolour").unwrap(), 0);
        assert_eq!(second.get::<u16>("style").unwrap(), 1);
        let first: Table = t.raw_get(1).unwrap();
        assert_eq!(first.get::<i64>("length").unwrap(), 8);
    }

    #[test]
    fn text_marshals_embedded_nul() {
        let lua = Lua::new();
        let args = marshal_text(&lua, b"a\0b").unwrap();
        let f: mlua::Function = lua.load("return function(s) return #s end").eval().unwrap();
        assert_eq!(f.call::<i64>(args).unwrap(), 3);
    }
}
