/// `scripting/api.rs` — auxiliary library modules opened into every VM
///
/// The fixed list is `rex`, `bit`, `utils`, `progress`, `bc`, `sqlite3` and
/// `lpeg`. The first four have Rust openers here; the rest are supplied by
/// the host through `LibrarySet::insert`. `luacom` is never opened eagerly,
/// only registered in `package.preload`.
use std::collections::HashMap;
use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use mlua::{
    Lua, MultiValue, Result as LuaResult, Table, UserData, UserDataMethods, Value, Variadic,
};
use regex::Regex;

/// Opens one module into the VM (usually by setting a global table).
pub type LibraryOpener = fn(&Lua) -> LuaResult<()>;

/// Name reserved for the lazily loaded automation bridge.
pub const AUTOMATION_BRIDGE: &str = "luacom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxLibrary {
    Rex,
    Bit,
    Compress,
    Progress,
    BinaryCodec,
    Sqlite,
    Lpeg,
}

impl AuxLibrary {
    /// Load order.
    pub const ALL: [AuxLibrary; 7] = [
        AuxLibrary::Rex,
        AuxLibrary::Bit,
        AuxLibrary::Compress,
        AuxLibrary::Progress,
        AuxLibrary::BinaryCodec,
        AuxLibrary::Sqlite,
        AuxLibrary::Lpeg,
    ];

    pub fn global_name(self) -> &'static str {
        match self {
            AuxLibrary::Rex => "rex",
            AuxLibrary::Bit => "bit",
            AuxLibrary::Compress => "utils",
            AuxLibrary::Progress => "progress",
            AuxLibrary::BinaryCodec => "bc",
            AuxLibrary::Sqlite => "sqlite3",
            AuxLibrary::Lpeg => "lpeg",
        }
    }

    fn builtin(self) -> Option<LibraryOpener> {
        match self {
            AuxLibrary::Rex => Some(register_rex),
            AuxLibrary::Bit => Some(register_bit),
            AuxLibrary::Compress => Some(register_utils),
            AuxLibrary::Progress => Some(register_progress),
            AuxLibrary::BinaryCodec | AuxLibrary::Sqlite | AuxLibrary::Lpeg => None,
        }
    }
}

/// Which opener runs for each auxiliary library, plus lazy preloads.
#[derive(Clone, Default)]
pub struct LibrarySet {
    overrides: HashMap<AuxLibrary, LibraryOpener>,
    preloads: Vec<(String, LibraryOpener)>,
}

impl LibrarySet {
    /// Use `opener` for `library` instead of the built-in one (or where
    /// there is no built-in).
    pub fn insert(&mut self, library: AuxLibrary, opener: LibraryOpener) {
        self.overrides.insert(library, opener);
    }

    /// Register `opener` under `package.preload[name]`. It runs on the first
    /// `require(name)` and the module is the global it sets.
    pub fn preload(&mut self, name: impl Into<String>, opener: LibraryOpener) {
        self.preloads.push((name.into(), opener));
    }

    fn opener(&self, library: AuxLibrary) -> Option<LibraryOpener> {
        self.overrides.get(&library).copied().or_else(|| library.builtin())
    }

    /// Open every available auxiliary library, in the fixed order.
    pub fn open_all(&self, lua: &Lua) -> LuaResult<()> {
        for library in AuxLibrary::ALL {
            match self.opener(library) {
                Some(open) => open(lua)?,
                None => log::debug!("[scripting] library '{}' not available", library.global_name()),
            }
        }
        Ok(())
    }

    /// Install the lazy loaders. Skipped quietly when `package.preload` is gone.
    pub fn install_preloads(&self, lua: &Lua) -> LuaResult<()> {
        let Some(package) = library_table(lua, "package") else {
            return Ok(());
        };
        let preload = match package.get::<Value>("preload")? {
            Value::Table(t) => t,
            _ => return Ok(()),
        };
        for (name, open) in &self.preloads {
            let module = name.clone();
            let open = *open;
            let loader = lua.create_function(move |lua, _: MultiValue| {
                open(lua)?;
                lua.globals().get::<Value>(module.as_str())
            })?;
            preload.set(name.as_str(), loader)?;
        }
        Ok(())
    }
}

// ── bit ───────────────────────────────────────────────────────────────────────

fn register_bit(lua: &Lua) -> LuaResult<()> {
    let tbl = lua.create_table()?;

    tbl.set("band", lua.create_function(|_, args: Variadic<i64>| {
        Ok(args.iter().fold(-1i64, |acc, x| acc & x))
    })?)?;
    tbl.set("bor", lua.create_function(|_, args: Variadic<i64>| {
        Ok(args.iter().fold(0i64, |acc, x| acc | x))
    })?)?;
    tbl.set("bxor", lua.create_function(|_, args: Variadic<i64>| {
        Ok(args.iter().fold(0i64, |acc, x| acc ^ x))
    })?)?;
    tbl.set("bnot", lua.create_function(|_, x: i64| Ok(!x))?)?;
    tbl.set("shl", lua.create_function(|_, (x, n): (i64, u32)| {
        Ok(x.checked_shl(n).unwrap_or(0))
    })?)?;
    // logical: zero-fill
    tbl.set("shr", lua.create_function(|_, (x, n): (i64, u32)| {
        Ok((x as u64).checked_shr(n).unwrap_or(0) as i64)
    })?)?;
    tbl.set("ashr", lua.create_function(|_, (x, n): (i64, u32)| {
        Ok(x >> n.min(63))
    })?)?;

    lua.globals().set("bit", tbl)?;
    Ok(())
}

// ── rex ───────────────────────────────────────────────────────────────────────

struct RexPattern(Regex);

impl RexPattern {
    /// start, end (1-based, inclusive) and a capture table, or nil.
    fn exec(&self, lua: &Lua, subject: &str, init: Option<usize>) -> LuaResult<MultiValue> {
        let start = init.unwrap_or(1).saturating_sub(1).min(subject.len());
        let Some(caps) = self.0.captures_at(subject, start) else {
            return Ok(MultiValue::from_iter([Value::Nil]));
        };
        let whole = caps.get(0).map(|m| (m.start() + 1, m.end())).unwrap_or((0, 0));
        let t = lua.create_table()?;
        for (i, group) in caps.iter().enumerate().skip(1) {
            match group {
                Some(m) => t.raw_set(i, m.as_str())?,
                None => t.raw_set(i, false)?,
            }
        }
        for name in self.0.capture_names().flatten() {
            match caps.name(name) {
                Some(m) => t.raw_set(name, m.as_str())?,
                None => t.raw_set(name, false)?,
            }
        }
        Ok(MultiValue::from_iter([
            Value::Integer(whole.0 as i64),
            Value::Integer(whole.1 as i64),
            Value::Table(t),
        ]))
    }
}

impl UserData for RexPattern {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("exec", |lua, this, (subject, init): (String, Option<usize>)| {
            this.exec(lua, &subject, init)
        });

        // Captures as separate values, or the whole match when there are none.
        methods.add_method("match", |lua, this, (subject, init): (String, Option<usize>)| {
            let start = init.unwrap_or(1).saturating_sub(1).min(subject.len());
            let Some(caps) = this.0.captures_at(&subject, start) else {
                return Ok(MultiValue::from_iter([Value::Nil]));
            };
            if caps.len() == 1 {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                return Ok(MultiValue::from_iter([Value::String(lua.create_string(whole)?)]));
            }
            let mut out = Vec::with_capacity(caps.len() - 1);
            for group in caps.iter().skip(1) {
                out.push(match group {
                    Some(m) => Value::String(lua.create_string(m.as_str())?),
                    None => Value::Boolean(false),
                });
            }
            Ok(MultiValue::from_iter(out))
        });

        // Calls `callback(whole, captures)` per match; returns the match count.
        methods.add_method("gmatch", |lua, this, (subject, callback): (String, mlua::Function)| {
            let mut count = 0i64;
            for caps in this.0.captures_iter(&subject) {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                let t = lua.create_table()?;
                for (i, group) in caps.iter().enumerate().skip(1) {
                    match group {
                        Some(m) => t.raw_set(i, m.as_str())?,
                        None => t.raw_set(i, false)?,
                    }
                }
                count += 1;
                let stop: Value = callback.call((whole, t))?;
                if matches!(stop, Value::Boolean(true)) {
                    break;
                }
            }
            Ok(count)
        });
    }
}

fn register_rex(lua: &Lua) -> LuaResult<()> {
    let tbl = lua.create_table()?;

    tbl.set("new", lua.create_function(|_, pattern: String| {
        Regex::new(&pattern)
            .map(RexPattern)
            .map_err(|e| mlua::Error::RuntimeError(format!("rex.new: {e}")))
    })?)?;
    tbl.set("escape", lua.create_function(|_, text: String| Ok(regex::escape(&text)))?)?;

    lua.globals().set("rex", tbl)?;
    Ok(())
}

// ── utils ─────────────────────────────────────────────────────────────────────

fn register_utils(lua: &Lua) -> LuaResult<()> {
    let tbl = lua.create_table()?;

    tbl.set("compress", lua.create_function(|lua, (data, level): (mlua::String, Option<u32>)| {
        let level = Compression::new(level.unwrap_or(6).min(9));
        let mut encoder = ZlibEncoder::new(Vec::new(), level);
        encoder.write_all(&data.as_bytes()).map_err(mlua::Error::external)?;
        let out = encoder.finish().map_err(mlua::Error::external)?;
        lua.create_string(out)
    })?)?;
    tbl.set("decompress", lua.create_function(|lua, data: mlua::String| {
        let bytes = data.as_bytes().to_vec();
        let mut out = Vec::new();
        ZlibDecoder::new(bytes.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| mlua::Error::RuntimeError(format!("utils.decompress: {e}")))?;
        lua.create_string(out)
    })?)?;

    lua.globals().set("utils", tbl)?;
    Ok(())
}

// ── progress ──────────────────────────────────────────────────────────────────

/// Progress indicator for long script jobs. Headless: reported through `log`.
struct ProgressDialog {
    title: String,
    min: i64,
    max: i64,
    position: i64,
    step: i64,
    status: String,
    closed: bool,
}

impl ProgressDialog {
    /// Script-chosen bounds can span the whole i64 range.
    fn percent(&self) -> i64 {
        let span = (i128::from(self.max) - i128::from(self.min)).max(1);
        let done = (i128::from(self.position) - i128::from(self.min)) * 100 / span;
        done.clamp(0, 100) as i64
    }

    fn report(&self) {
        log::debug!("[progress] {}: {}% {}", self.title, self.percent(), self.status);
    }
}

impl UserData for ProgressDialog {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("range", |_, this, (min, max): (i64, i64)| {
            this.min = min;
            this.max = max;
            this.position = this.position.clamp(min.min(max), max.max(min));
            Ok(())
        });
        methods.add_method_mut("position", |_, this, pos: i64| {
            this.position = pos;
            this.report();
            Ok(())
        });
        methods.add_method_mut("setstep", |_, this, step: i64| {
            this.step = step;
            Ok(())
        });
        methods.add_method_mut("step", |_, this, ()| {
            this.position = this.position.saturating_add(this.step);
            this.report();
            Ok(())
        });
        methods.add_method_mut("status", |_, this, text: String| {
            this.status = text;
            this.report();
            Ok(())
        });
        methods.add_method("checkcancel", |_, _, ()| Ok(false));
        methods.add_method("percent", |_, this, ()| Ok(this.percent()));
        methods.add_method_mut("close", |_, this, ()| {
            if !this.closed {
                this.closed = true;
                log::debug!("[progress] {} closed", this.title);
            }
            Ok(())
        });
    }
}

fn register_progress(lua: &Lua) -> LuaResult<()> {
    let tbl = lua.create_table()?;

    tbl.set("new", lua.create_function(|_, title: Option<String>| {
        Ok(ProgressDialog {
            title: title.unwrap_or_else(|| "Progress...".to_string()),
            min: 0,
            max: 100,
            position: 0,
            step: 10,
            status: String::new(),
            closed: false,
        })
    })?)?;

    lua.globals().set("progress", tbl)?;
    Ok(())
}

/// The global table `name`, if it exists.
fn library_table(lua: &Lua, name: &str) -> Option<Table> {
    match lua.globals().get::<Value>(name) {
        Ok(Value::Table(t)) => Some(t),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> Lua {
        let lua = Lua::new();
        LibrarySet::default().open_all(&lua).unwrap();
        lua
    }

    #[test]
    fn builtin_libraries_are_globals() {
        let lua = opened();
        for name in ["rex", "bit", "utils", "progress"] {
            assert!(library_table(&lua, name).is_some(), "{name} missing");
        }
        for name in ["bc", "sqlite3", "lpeg"] {
            assert!(library_table(&lua, name).is_none(), "{name} unexpected");
        }
    }

    #[test]
    fn host_supplied_library_is_opened() {
        fn open_bc(lua: &Lua) -> LuaResult<()> {
            let t = lua.create_table()?;
            t.set("version", "test")?;
            lua.globals().set("bc", t)
        }
        let lua = Lua::new();
        let mut set = LibrarySet::default();
        set.insert(AuxLibrary::BinaryCodec, open_bc);
        set.open_all(&lua).unwrap();
        assert_eq!(lua.load("return bc.version").eval::<String>().unwrap(), "test");
    }

    #[test]
    fn bit_operations() {
        let lua = opened();
        let r: (i64, i64, i64, i64, i64, i64) = lua
            .load("return bit.band(12, 10), bit.bor(12, 3), bit.bxor(5, 1), bit.shl(1, 4), bit.shr(-1, 60), bit.ashr(-16, 2)")
            .eval()
            .unwrap();
        assert_eq!(r, (8, 15, 4, 16, 15, -4));
    }

    #[test]
    fn rex_exec_and_match() {
        let lua = opened();
        let (s, e, who): (i64, i64, String) = lua
            .load(r#"local r = rex.new("(?<who>\\w+) says") local s, e, t = r:exec("Nick says hi") return s, e, t.who"#)
            .eval()
            .unwrap();
        assert_eq!((s, e, who.as_str()), (1, 9, "Nick"));

        let m: Value = lua.load(r#"return rex.new("zzz"):match("abc")"#).eval().unwrap();
        assert_eq!(m, Value::Nil);

        let count: i64 = lua
            .load(r#"local n = 0 local c = rex.new("\\d"):gmatch("a1b2c3", function(w) n = n + tonumber(w) end) return c * 10 + n"#)
            .eval()
            .unwrap();
        assert_eq!(count, 36);
    }

    #[test]
    fn bad_pattern_raises() {
        let lua = opened();
        let err = lua.load(r#"rex.new("(")"#).exec().unwrap_err();
        assert!(err.to_string().contains("rex.new"));
    }

    #[test]
    fn compress_round_trip_keeps_binary() {
        let lua = opened();
        let ok: bool = lua
            .load(r#"local s = string.rep("abc\0", 100) local z = utils.compress(s) return #z < #s and utils.decompress(z) == s"#)
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn progress_tracks_percent() {
        let lua = opened();
        let pct: i64 = lua
            .load(r#"local p = progress.new("Loading") p:range(0, 200) p:setstep(50) p:step() p:step() p:status("half") local v = p:percent() p:close() return v"#)
            .eval()
            .unwrap();
        assert_eq!(pct, 50);
    }

    #[test]
    fn progress_survives_extreme_bounds() {
        let lua = opened();
        let (mid, full, floor): (i64, i64, i64) = lua
            .load(
                r#"
                local p = progress.new()
                p:range(math.mininteger, math.maxinteger)
                local mid = p:percent()
                p:setstep(math.maxinteger) p:step() p:step()
                local full = p:percent()
                p:position(math.mininteger) p:setstep(math.mininteger) p:step()
                return mid, full, p:percent()
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(mid, 50);
        assert_eq!(full, 100);
        assert_eq!(floor, 0);
    }

    #[test]
    fn preload_is_lazy() {
        fn open_bridge(lua: &Lua) -> LuaResult<()> {
            let t = lua.create_table()?;
            t.set("ready", true)?;
            lua.globals().set(AUTOMATION_BRIDGE, t)
        }
        let lua = Lua::new();
        let mut set = LibrarySet::default();
        set.preload(AUTOMATION_BRIDGE, open_bridge);
        set.install_preloads(&lua).unwrap();
        assert!(library_table(&lua, AUTOMATION_BRIDGE).is_none());
        let ready: bool = lua.load(r#"return require("luacom").ready"#).eval().unwrap();
        assert!(ready);
    }
}
