//! One callback per event kind, retained in the Lua registry.
//!
//! The table of retained references lives in the state's app-data slot, so it
//! is dropped together with the interpreter and can never be consulted after
//! teardown. Registry and host subscription state change together: a kind is
//! present here exactly when the host has agreed to deliver it.

use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::host::Host;
use crate::status::StatusCode;
use mlua::{Function, Lua, RegistryKey};
use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct CallbackRegistry {
    slots: BTreeMap<EventKind, RegistryKey>,
}

/// Attach an empty registry to a fresh state.
pub(crate) fn attach(lua: &Lua) {
    lua.set_app_data(CallbackRegistry::default());
}

fn with_registry<R>(lua: &Lua, f: impl FnOnce(&mut CallbackRegistry) -> R) -> Result<R> {
    let mut registry = lua
        .app_data_mut::<CallbackRegistry>()
        .ok_or_else(|| Error::Lua(mlua::Error::RuntimeError("callback registry missing".into())))?;
    Ok(f(&mut registry))
}

/// Require a function, reporting what was found otherwise.
pub(crate) fn callable<'lua>(value: mlua::Value<'lua>, what: &str) -> Result<Function<'lua>> {
    match value {
        mlua::Value::Function(func) => Ok(func),
        other => Err(Error::NotCallable {
            what: what.to_string(),
            type_name: other.type_name(),
        }),
    }
}

/// Store `callback` for `kind`, replacing any earlier registration.
///
/// A replaced reference is released before the new one is stored. The host
/// is only asked to subscribe when the kind was not already registered; if
/// it declines, the new entry is rolled back.
pub(crate) fn register(
    lua: &Lua,
    host: &dyn Host,
    kind: EventKind,
    callback: Function<'_>,
) -> Result<()> {
    kind.ensure_dispatchable()?;
    let key = lua.create_registry_value(callback)?;

    let previous = with_registry(lua, |registry| registry.slots.remove(&kind))?;
    let replaced = previous.is_some();
    if let Some(previous) = previous {
        lua.remove_registry_value(previous)?;
    }
    with_registry(lua, |registry| registry.slots.insert(kind, key))?;

    if replaced {
        tracing::debug!(%kind, "callback replaced");
        return Ok(());
    }

    let status = host.subscribe(kind);
    if !status.is_success() {
        if let Some(key) = with_registry(lua, |registry| registry.slots.remove(&kind))? {
            lua.remove_registry_value(key)?;
        }
        return Err(Error::HostDeclined {
            action: "subscribe",
            kind,
            status,
        });
    }

    tracing::debug!(%kind, "callback registered");
    Ok(())
}

/// Drop the registration for `kind`.
///
/// Returns `false` when nothing was registered. The host is asked to stop
/// delivering first; if it refuses, the registration stays in place.
pub(crate) fn unregister(lua: &Lua, host: &dyn Host, kind: EventKind) -> Result<bool> {
    kind.ensure_dispatchable()?;
    if !with_registry(lua, |registry| registry.slots.contains_key(&kind))? {
        return Ok(false);
    }

    let status = host.unsubscribe(kind);
    if !status.is_success() {
        return Err(Error::HostDeclined {
            action: "unsubscribe",
            kind,
            status,
        });
    }

    if let Some(key) = with_registry(lua, |registry| registry.slots.remove(&kind))? {
        lua.remove_registry_value(key)?;
    }
    tracing::debug!(%kind, "callback unregistered");
    Ok(true)
}

/// The callback registered for `kind`, if any.
pub(crate) fn callback(lua: &Lua, kind: EventKind) -> Result<Option<Function<'_>>> {
    let found = with_registry(lua, |registry| {
        registry
            .slots
            .get(&kind)
            .map(|key| lua.registry_value::<Function>(key))
    })?;
    Ok(found.transpose()?)
}

pub(crate) fn registered_kinds(lua: &Lua) -> Result<Vec<EventKind>> {
    with_registry(lua, |registry| registry.slots.keys().copied().collect())
}

/// Release every registration and unsubscribe its kind from the host.
///
/// Best-effort: refusals from the host are collected and returned, the
/// references are released regardless.
pub(crate) fn clear(lua: &Lua, host: &dyn Host) -> Result<Vec<(EventKind, StatusCode)>> {
    let slots = with_registry(lua, |registry| std::mem::take(&mut registry.slots))?;
    let mut refused = Vec::new();
    for (kind, key) in slots {
        let status = host.unsubscribe(kind);
        if !status.is_success() {
            refused.push((kind, status));
        }
        lua.remove_registry_value(key)?;
    }
    Ok(refused)
}
