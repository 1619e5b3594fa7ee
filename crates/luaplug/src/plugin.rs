//! Plugin lifecycle: load, dispatch, unload.
//!
//! A [`Plugin`] is the explicit context object for one script instance. All
//! entry into the Lua state goes through a single mutex (the gate), so the
//! host may call in from any thread. There is no timeout: a callback that
//! never returns holds the gate and stalls every other event for this plugin.

use crate::config::PluginConfig;
use crate::error::{Error, Result};
use crate::events::{EventKind, EventPayload};
use crate::host::{Host, log_level};
use crate::interpreter::Interpreter;
use crate::status::StatusCode;
use crate::{dispatch, primitives, registry};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Broker plugin API version this bridge is written against.
pub const API_VERSION: i32 = 5;

/// Answer the broker's version query.
///
/// Runs before any plugin exists, so no script can take part. The answer is
/// always [`API_VERSION`]; a broker that did not offer it will refuse the load.
#[must_use]
pub fn negotiate_version(offered: &[i32]) -> i32 {
    tracing::debug!(?offered, "broker advertises plugin api versions");
    if !offered.contains(&API_VERSION) {
        tracing::warn!(?offered, wanted = API_VERSION, "broker does not offer the plugin api version");
    }
    API_VERSION
}

/// Where a plugin is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unloaded,
    Created,
    ScriptLoaded,
    Initialized,
    Running,
    CleaningUp,
    Destroyed,
}

impl LifecycleState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Created => "created",
            Self::ScriptLoaded => "script-loaded",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::CleaningUp => "cleaning-up",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

struct Loaded {
    interpreter: Interpreter,
    script: PathBuf,
}

struct Gate {
    state: LifecycleState,
    loaded: Option<Loaded>,
}

impl Gate {
    fn advance(&mut self, next: LifecycleState) {
        tracing::debug!(from = %self.state, to = %next, "plugin state change");
        self.state = next;
    }
}

/// One loaded script and everything it registered.
pub struct Plugin {
    host: Arc<dyn Host>,
    identity: String,
    gate: Mutex<Gate>,
}

impl Plugin {
    pub fn new(host: Arc<dyn Host>, identity: impl Into<String>) -> Self {
        Self {
            host,
            identity: identity.into(),
            gate: Mutex::new(Gate {
                state: LifecycleState::Unloaded,
                loaded: None,
            }),
        }
    }

    fn gate(&self) -> Result<MutexGuard<'_, Gate>> {
        self.gate.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> LifecycleState {
        self.gate()
            .map_or(LifecycleState::Destroyed, |gate| gate.state)
    }

    /// Path of the running script, if any.
    pub fn script(&self) -> Option<PathBuf> {
        self.gate()
            .ok()?
            .loaded
            .as_ref()
            .map(|loaded| loaded.script.clone())
    }

    /// Host load entry point: parse `options` and start the script.
    ///
    /// Every failure is terminal: it is written to the host log, the
    /// interpreter is destroyed, and the plugin ends up `Destroyed`.
    pub fn init<K, V>(&self, options: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config = PluginConfig::from_options(options).inspect_err(|err| {
            self.host.log_write(log_level::ERR, &err.to_string());
        })?;
        self.load(&config)
    }

    /// Create the interpreter, run the script and its `init()`.
    pub fn load(&self, config: &PluginConfig) -> Result<()> {
        let mut gate = self.gate()?;
        if gate.state != LifecycleState::Unloaded {
            return Err(Error::InvalidArgument(format!(
                "plugin {} cannot load from state {}",
                self.identity, gate.state
            )));
        }

        self.host.log_write(
            log_level::INFO,
            &format!("loading lua plugin: {}", config.script.display()),
        );

        match self.start(&mut gate, config) {
            Ok(interpreter) => {
                gate.loaded = Some(Loaded {
                    interpreter,
                    script: config.script.clone(),
                });
                gate.advance(LifecycleState::Running);
                tracing::info!(
                    plugin = %self.identity,
                    script = %config.script.display(),
                    "lua plugin running"
                );
                Ok(())
            }
            Err(err) => {
                gate.advance(LifecycleState::Destroyed);
                self.host.log_write(
                    log_level::ERR,
                    &format!("lua plugin {} failed to load: {err}", config.script.display()),
                );
                Err(err)
            }
        }
    }

    fn start(&self, gate: &mut Gate, config: &PluginConfig) -> Result<Interpreter> {
        let interpreter = Interpreter::create()?;
        registry::attach(interpreter.lua());
        gate.advance(LifecycleState::Created);

        if let Err(err) = self.run_script(gate, &interpreter, config) {
            // Undo anything init() managed to register before failing.
            match registry::clear(interpreter.lua(), self.host.as_ref()) {
                Ok(refused) => self.log_refused_unsubscribes(&refused),
                Err(clear_err) => tracing::warn!(error = %clear_err, "registry cleanup failed"),
            }
            interpreter.destroy();
            return Err(err);
        }
        Ok(interpreter)
    }

    fn run_script(
        &self,
        gate: &mut Gate,
        interpreter: &Interpreter,
        config: &PluginConfig,
    ) -> Result<()> {
        primitives::install(interpreter.lua(), &self.host, &config.global)?;
        interpreter.load_and_run(&config.script)?;
        gate.advance(LifecycleState::ScriptLoaded);

        let init = interpreter
            .entry_point("init")?
            .ok_or_else(|| Error::NotCallable {
                what: "global `init`".to_string(),
                type_name: "nil",
            })?;
        init.call::<_, ()>(()).map_err(Error::from_script)?;
        gate.advance(LifecycleState::Initialized);
        Ok(())
    }

    /// Host event entry point.
    ///
    /// Failures are logged to the host and reduced to a status code; see
    /// [`Plugin::try_dispatch`] for the distinguishable error.
    pub fn dispatch(&self, payload: &EventPayload<'_>) -> StatusCode {
        match self.try_dispatch(payload) {
            Ok(status) => status,
            Err(err) => {
                let script = self
                    .script()
                    .map_or_else(|| "<none>".to_string(), |path| path.display().to_string());
                let kind = payload.kind();
                tracing::warn!(%kind, %script, error = %err, "dispatch failed");
                self.host.log_write(
                    log_level::ERR,
                    &format!("lua plugin {script}: {kind} callback failed: {err}"),
                );
                err.status()
            }
        }
    }

    /// Dispatch `payload` to its registered callback.
    ///
    /// Rejected with `NotRunning` outside the running state, before the
    /// interpreter is touched.
    pub fn try_dispatch(&self, payload: &EventPayload<'_>) -> Result<StatusCode> {
        let gate = self.gate()?;
        let loaded = match (gate.state, gate.loaded.as_ref()) {
            (LifecycleState::Running, Some(loaded)) => loaded,
            (state, _) => return Err(Error::NotRunning(state)),
        };
        match payload {
            EventPayload::Opaque(kind) if kind.is_dispatchable() => {
                return Err(Error::InvalidArgument(format!(
                    "{kind} event delivered without its payload"
                )));
            }
            _ => {}
        }
        let status = dispatch::dispatch(loaded.interpreter.lua(), payload)?;
        tracing::trace!(kind = %payload.kind(), %status, "dispatched");
        Ok(status)
    }

    /// Dispatch an event identified by its raw broker number.
    pub fn dispatch_raw(&self, raw_kind: i64, payload: &EventPayload<'_>) -> StatusCode {
        match EventKind::from_raw(raw_kind) {
            Ok(kind) if kind == payload.kind() => self.dispatch(payload),
            Ok(kind) => {
                self.host.log_write(
                    log_level::ERR,
                    &format!("event {kind} delivered with a {} payload", payload.kind()),
                );
                StatusCode::INVALID_ARGUMENT
            }
            Err(err) => {
                self.host.log_write(log_level::WARNING, &err.to_string());
                err.status()
            }
        }
    }

    /// Kinds the script currently has callbacks for.
    pub fn registered_kinds(&self) -> Result<Vec<EventKind>> {
        let gate = self.gate()?;
        match (gate.state, gate.loaded.as_ref()) {
            (LifecycleState::Running, Some(loaded)) => {
                registry::registered_kinds(loaded.interpreter.lua())
            }
            (state, _) => Err(Error::NotRunning(state)),
        }
    }

    /// Host unload entry point. Always succeeds.
    ///
    /// Runs the script's `cleanup()` if it has one, releases every callback,
    /// unsubscribes from the host and destroys the interpreter. Script faults
    /// on the way are logged and otherwise ignored.
    pub fn cleanup(&self) -> StatusCode {
        let mut gate = match self.gate.lock() {
            Ok(gate) => gate,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(loaded) = gate.loaded.take() else {
            if gate.state != LifecycleState::Unloaded {
                gate.advance(LifecycleState::Destroyed);
            }
            return StatusCode::SUCCESS;
        };

        gate.advance(LifecycleState::CleaningUp);
        self.run_cleanup(&loaded);

        match registry::clear(loaded.interpreter.lua(), self.host.as_ref()) {
            Ok(refused) => self.log_refused_unsubscribes(&refused),
            Err(err) => self.host.log_write(
                log_level::ERR,
                &format!("lua plugin {}: releasing callbacks failed: {err}", loaded.script.display()),
            ),
        }

        loaded.interpreter.destroy();
        gate.advance(LifecycleState::Destroyed);
        tracing::info!(plugin = %self.identity, script = %loaded.script.display(), "lua plugin unloaded");
        StatusCode::SUCCESS
    }

    fn run_cleanup(&self, loaded: &Loaded) {
        let result = match loaded.interpreter.entry_point("cleanup") {
            Ok(Some(cleanup)) => cleanup.call::<_, ()>(()).map_err(Error::from_script),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.host.log_write(
                log_level::ERR,
                &format!("plugin cleanup failed: {} ({err})", loaded.script.display()),
            );
        }
    }

    fn log_refused_unsubscribes(&self, refused: &[(EventKind, StatusCode)]) {
        for (kind, status) in refused {
            self.host.log_write(
                log_level::WARNING,
                &format!("host refused to unsubscribe {kind}: {status}"),
            );
        }
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if matches!(self.state(), LifecycleState::Running) {
            self.cleanup();
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Convenience for hosts that just want a running plugin for one script.
pub fn load_script(host: Arc<dyn Host>, script: &Path) -> Result<Plugin> {
    let plugin = Plugin::new(host, script.display().to_string());
    plugin.load(&PluginConfig::new(script))?;
    Ok(plugin)
}
