//! Plugin options handed over by the host at load time.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Option naming the script to load.
pub const SCRIPT_OPTION: &str = "plug";
/// Option renaming the global the namespace is installed under.
pub const GLOBAL_OPTION: &str = "plug_global";
pub const DEFAULT_GLOBAL: &str = "plug";

const LUA_KEYWORDS: [&str; 22] = [
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Parsed plugin options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginConfig {
    pub script: PathBuf,
    pub global: String,
}

impl PluginConfig {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            global: DEFAULT_GLOBAL.to_string(),
        }
    }

    /// Build from the host's key/value option list.
    ///
    /// `plug` is required; when repeated, the first one counts. Options this
    /// bridge does not know are ignored.
    pub fn from_options<K, V>(options: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut script = None;
        let mut global = None;
        for (key, value) in options {
            match key.as_ref() {
                SCRIPT_OPTION => {
                    script.get_or_insert(value.as_ref());
                }
                GLOBAL_OPTION => {
                    global.get_or_insert(value.as_ref());
                }
                other => tracing::debug!(option = other, "ignoring unknown plugin option"),
            }
        }

        let script = script
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "plugin_opt_{SCRIPT_OPTION} specifying the script file is required"
                ))
            })?;

        let global = global.unwrap_or(DEFAULT_GLOBAL);
        if !is_identifier(global) {
            return Err(Error::InvalidArgument(format!(
                "plugin_opt_{GLOBAL_OPTION} must be a Lua identifier (got {global:?})"
            )));
        }

        Ok(Self {
            script: PathBuf::from(script),
            global: global.to_string(),
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !LUA_KEYWORDS.contains(&name)
}
