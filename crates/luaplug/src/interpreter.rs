//! Ownership of the embedded Lua state.

use crate::error::{Error, Result};
use mlua::{Function, Lua, LuaOptions, StdLib, Value};
use std::fs;
use std::path::Path;

/// Exclusive owner of one Lua execution context.
///
/// Created when the plugin loads and consumed by [`Interpreter::destroy`]
/// when it unloads. Everything retained inside the state (callback
/// references, the registry, scoped client handles) goes away with it.
pub struct Interpreter {
    lua: Lua,
}

impl Interpreter {
    /// Fresh state with the safe standard libraries loaded.
    pub fn create() -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::new())
            .map_err(|err| Error::InterpreterCreate(err.to_string()))?;
        Ok(Self { lua })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Compile `path` as one chunk and run its top-level body once.
    ///
    /// Read and syntax failures are `ScriptLoad`; a fault raised while the
    /// body runs is `ScriptRuntime`.
    pub fn load_and_run(&self, path: &Path) -> Result<()> {
        let source = fs::read(path).map_err(|err| Error::ScriptLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let chunk = self
            .lua
            .load(script_body(&source))
            .set_name(format!("@{}", path.display()))
            .into_function()
            .map_err(|err| Error::ScriptLoad {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        chunk.call::<_, ()>(()).map_err(Error::from_script)
    }

    /// Look up a global entry point such as `init` or `cleanup`.
    ///
    /// Returns `Ok(None)` when the global is unset and `NotCallable` when it
    /// holds something other than a function.
    pub fn entry_point(&self, name: &str) -> Result<Option<Function<'_>>> {
        match self.lua.globals().get::<_, Value>(name)? {
            Value::Nil => Ok(None),
            Value::Function(func) => Ok(Some(func)),
            other => Err(Error::NotCallable {
                what: format!("global `{name}`"),
                type_name: other.type_name(),
            }),
        }
    }

    /// Release the state. Consuming `self` makes a second call impossible.
    pub fn destroy(self) {
        drop(self.lua);
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Strip a UTF-8 byte order mark and a leading `#` line, keeping the newline
/// so reported line numbers still match the file. Lua source is bytes, so no
/// encoding is assumed.
fn script_body(source: &[u8]) -> &[u8] {
    let source = source.strip_prefix(UTF8_BOM).unwrap_or(source);
    match source.strip_prefix(b"#") {
        Some(rest) => rest
            .iter()
            .position(|&byte| byte == b'\n')
            .map_or(&[][..], |idx| &rest[idx..]),
        None => source,
    }
}
