//! luaplug - run a broker Lua plugin against an in-process host.
//!
//! Loads a script the way the broker would, fires synthetic events at it and
//! reports the status codes the broker would have received.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luaplug::{
    AclAccess, ClientInfo, ClientRef, EventPayload, Host, Plugin, StandaloneHost, StatusCode,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

mod config;
mod logging;

use config::{HarnessConfig, parse_key_val};
use logging::{LogConfig, LogFormat};

const DEFAULT_CLIENT_ID: &str = "luaplug";

/// luaplug - broker Lua plugin harness
#[derive(Parser)]
#[command(name = "luaplug")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML file with plugin options and known clients
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Plugin option, overrides the config file (repeatable)
    #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_val, global = true)]
    opts: Vec<(String, String)>,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a script, run init(), list its callbacks, then unload it
    Check {
        /// Script to load
        script: PathBuf,
    },
    /// Load a script and fire one event at it
    Fire {
        /// Script to load
        script: PathBuf,

        /// Client id the event comes from
        #[arg(long)]
        client: Option<String>,

        #[command(subcommand)]
        event: Event,
    },
}

#[derive(Subcommand)]
enum Event {
    /// A message was published
    Message {
        #[arg(long)]
        topic: String,

        #[arg(long, default_value_t = 0)]
        payload_len: u32,
    },
    /// Periodic tick; defaults to now with the next tick one second later
    Tick {
        #[arg(long)]
        now_s: Option<i64>,

        #[arg(long, default_value_t = 1)]
        interval_s: i64,
    },
    /// Access check for a topic
    Acl {
        #[arg(long)]
        topic: String,

        /// none | read | write | subscribe | unsubscribe
        #[arg(long, default_value = "read")]
        access: AclAccess,

        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,

        #[arg(long)]
        retain: bool,
    },
    /// Username/password authentication
    Auth {
        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    };
    if let Err(err) = logging::init_logging(&log_config) {
        eprintln!("error: {err}");
        return ExitCode::from(2);
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };

    let host = Arc::new(StandaloneHost::new());
    for client in config.client_infos() {
        host.add_client(client);
    }

    match cli.command {
        Commands::Check { script } => {
            let plugin = start(&host, &config, &script, &cli.opts)?;
            let kinds = plugin.registered_kinds()?;
            if kinds.is_empty() {
                println!("registered: (none)");
            } else {
                let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
                println!("registered: {}", names.join(", "));
            }
            plugin.cleanup();
            report_published(&host);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fire {
            script,
            client,
            event,
        } => {
            let client = select_client(&host, &config, client.as_deref());
            let plugin = start(&host, &config, &script, &cli.opts)?;
            let status = fire(&plugin, client, &event);
            plugin.cleanup();
            report_published(&host);
            println!("status: {status}");
            Ok(if status.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn start(
    host: &Arc<StandaloneHost>,
    config: &HarnessConfig,
    script: &Path,
    overrides: &[(String, String)],
) -> Result<Plugin> {
    let version = luaplug::negotiate_version(&[luaplug::API_VERSION]);
    tracing::debug!(version, "plugin api negotiated");
    let dyn_host: Arc<dyn Host> = host.clone();
    let plugin = Plugin::new(dyn_host, script.display().to_string());
    plugin
        .init(&config.plugin_options(script, overrides))
        .with_context(|| format!("failed to load plugin {}", script.display()))?;
    Ok(plugin)
}

fn select_client(host: &StandaloneHost, config: &HarnessConfig, id: Option<&str>) -> ClientRef {
    let id = id
        .map(str::to_string)
        .or_else(|| config.clients.keys().next().cloned())
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
    host.find_client(&id).unwrap_or_else(|| {
        tracing::debug!(client = %id, "client not in config, adding it");
        host.add_client(ClientInfo {
            id,
            address: Some("127.0.0.1".to_string()),
            username: None,
        })
    })
}

fn fire(plugin: &Plugin, client: ClientRef, event: &Event) -> StatusCode {
    let payload = match event {
        Event::Message { topic, payload_len } => EventPayload::Message {
            client,
            topic: topic.as_str(),
            payload_len: *payload_len,
        },
        Event::Tick { now_s, interval_s } => {
            let (now_s, now_ns) = match now_s {
                Some(secs) => (*secs, 0),
                None => wall_clock(),
            };
            EventPayload::Tick {
                now_s,
                now_ns,
                next_s: now_s.saturating_add(*interval_s),
                next_ns: now_ns,
            }
        }
        Event::Acl {
            topic,
            access,
            qos,
            retain,
        } => EventPayload::AclCheck {
            client,
            access: *access,
            topic: topic.as_str(),
            qos: *qos,
            retain: *retain,
        },
        Event::Auth { username, password } => EventPayload::BasicAuth {
            client,
            username: username.as_deref(),
            password: password.as_deref(),
        },
    };
    plugin.dispatch(&payload)
}

fn wall_clock() -> (i64, i64) {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or((0, 0), |elapsed| {
            (elapsed.as_secs() as i64, i64::from(elapsed.subsec_nanos()))
        })
}

fn report_published(host: &StandaloneHost) {
    for message in host.published() {
        println!(
            "published topic={} qos={} retain={} payload={}",
            message.topic,
            message.qos,
            message.retain,
            String::from_utf8_lossy(&message.payload)
        );
    }
}
