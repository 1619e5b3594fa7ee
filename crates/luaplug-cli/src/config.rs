//! Harness configuration file.
//!
//! ```toml
//! [options]
//! plug = "scripts/acl.lua"
//! plug_global = "plug"
//!
//! [clients.c1]
//! address = "127.0.0.1"
//! username = "alice"
//! ```

use anyhow::{Context, Result};
use luaplug::ClientInfo;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Plugin options, handed to the plugin as key/value pairs
    pub options: BTreeMap<String, String>,
    /// Clients the standalone host knows, keyed by client id
    pub clients: BTreeMap<String, ClientEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientEntry {
    pub address: Option<String>,
    pub username: Option<String>,
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Option list for the plugin: `script` first, then command-line
    /// overrides, then file options. The plugin keeps the first value of a
    /// repeated option.
    pub fn plugin_options(
        &self,
        script: &Path,
        overrides: &[(String, String)],
    ) -> Vec<(String, String)> {
        let mut options = vec![("plug".to_string(), script.display().to_string())];
        options.extend(overrides.iter().cloned());
        options.extend(
            self.options
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        options
    }

    pub fn client_infos(&self) -> impl Iterator<Item = ClientInfo> + '_ {
        self.clients.iter().map(|(id, entry)| ClientInfo {
            id: id.clone(),
            address: entry.address.clone(),
            username: entry.username.clone(),
        })
    }
}

/// Parse a `key=value` command-line option.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_and_clients() {
        let config = HarnessConfig::parse(
            r#"
            [options]
            plug = "scripts/acl.lua"
            plug_global = "broker"

            [clients.c1]
            address = "127.0.0.1"
            username = "alice"

            [clients.c2]
        "#,
        )
        .unwrap();
        assert_eq!(config.options["plug_global"], "broker");
        let clients: Vec<_> = config.client_infos().collect();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].id, "c1");
        assert_eq!(clients[0].username.as_deref(), Some("alice"));
        assert_eq!(clients[1].address, None);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(HarnessConfig::parse("").unwrap(), HarnessConfig::default());
    }

    #[test]
    fn script_and_overrides_come_before_file_options() {
        let config = HarnessConfig::parse(
            r#"
            [options]
            plug = "from-file.lua"
            plug_global = "file"
        "#,
        )
        .unwrap();
        let options = config.plugin_options(
            Path::new("cli.lua"),
            &[("plug_global".to_string(), "cli".to_string())],
        );
        assert_eq!(options[0], ("plug".to_string(), "cli.lua".to_string()));
        assert_eq!(options[1], ("plug_global".to_string(), "cli".to_string()));
        assert_eq!(options.len(), 4);
    }

    #[test]
    fn key_val_parsing() {
        assert_eq!(
            parse_key_val("plug_global=broker").unwrap(),
            ("plug_global".to_string(), "broker".to_string())
        );
        assert_eq!(
            parse_key_val("x=a=b").unwrap(),
            ("x".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=v").is_err());
    }
}
