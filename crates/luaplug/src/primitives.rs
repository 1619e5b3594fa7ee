//! The `plug` namespace: host operations and constants visible to scripts.

use crate::error::{Error, Result};
use crate::events::{AclAccess, ClientRef, EventKind};
use crate::host::{Host, Publish, log_level};
use crate::registry;
use crate::status::StatusCode;
use crate::translate::truthy;
use mlua::{Function, Lua, MetaMethod, RegistryKey, Table, UserData, UserDataMethods, Value};
use std::sync::Arc;

/// Stateless iterator over the namespace entries; the table itself stays
/// captured as an upvalue.
const ENTRIES: &str = r#"
local next, inner = next, ...
return function(_, key)
    return next(inner, key)
end
"#;

/// The installed namespace.
///
/// A userdata rather than a table, so `rawset`, `setmetatable` and `pairs`
/// never reach the entries themselves.
struct Namespace {
    name: String,
    entries: RegistryKey,
    iterate: RegistryKey,
}

impl UserData for Namespace {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            lua.registry_value::<Table>(&this.entries)?
                .raw_get::<_, Value>(key)
        });
        methods.add_meta_method(MetaMethod::NewIndex, |_, this, (key, _): (Value, Value)| {
            let key = match key {
                Value::String(key) => key.to_string_lossy().into_owned(),
                other => format!("<{}>", other.type_name()),
            };
            Err::<(), _>(mlua::Error::RuntimeError(format!(
                "{}.{key} is read-only",
                this.name
            )))
        });
        methods.add_meta_method(MetaMethod::Pairs, |lua, this, ()| {
            let iterate: Function = lua.registry_value(&this.iterate)?;
            Ok((iterate, Value::Nil, Value::Nil))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.name.clone()));
    }
}

/// Script-side stand-in for a [`ClientRef`].
///
/// Only ever created inside a dispatch scope; mlua destructs it when the
/// dispatch returns, after which every primitive rejects it.
pub(crate) struct ScriptClient(pub(crate) ClientRef);

impl UserData for ScriptClient {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, _, ()| Ok("plug.client"));
    }
}

fn client_ref(value: &Value<'_>) -> Result<ClientRef> {
    let Value::UserData(data) = value else {
        return Err(Error::InvalidClientRef(format!(
            "expected a client handle, got {}",
            value.type_name()
        )));
    };
    match data.borrow::<ScriptClient>() {
        Ok(client) => Ok(client.0),
        Err(mlua::Error::UserDataDestructed) => Err(Error::InvalidClientRef(
            "client handle used after its event callback returned".to_string(),
        )),
        Err(_) => Err(Error::InvalidClientRef(
            "userdata is not a client handle".to_string(),
        )),
    }
}

fn resolve(found: Option<String>, client: ClientRef, what: &str) -> Result<String> {
    found.ok_or_else(|| {
        Error::InvalidClientRef(format!("host has no {what} for client {}", client.token()))
    })
}

fn constants(table: &Table<'_>) -> Result<()> {
    for kind in EventKind::ALL {
        table.set(kind.constant_name(), kind.raw())?;
    }
    for (name, level) in log_level::NAMED {
        table.set(name, level)?;
    }
    for access in AclAccess::ALL {
        table.set(access.constant_name(), access.raw())?;
    }
    for (name, code) in StatusCode::NAMED {
        table.set(name, code.raw())?;
    }
    Ok(())
}

/// Build the namespace and install it as the global `global`.
pub(crate) fn install(lua: &Lua, host: &Arc<dyn Host>, global: &str) -> Result<()> {
    let inner = lua.create_table()?;
    constants(&inner)?;

    let sink = Arc::clone(host);
    inner.set(
        "log",
        lua.create_function(move |_, (level, message): (i32, mlua::String)| {
            sink.log_write(level, &message.to_string_lossy());
            Ok(())
        })?,
    )?;

    let sink = Arc::clone(host);
    let publish = lua.create_function(
        move |_,
              (client_id, topic, payload, qos, retain): (
            Option<String>,
            String,
            Option<mlua::String>,
            Option<i64>,
            Value,
        )| {
            let qos = match qos.unwrap_or(0) {
                qos @ 0..=2 => qos as u8,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "qos must be 0, 1 or 2 (got {other})"
                    ))
                    .into());
                }
            };
            let status = sink.publish_copy(Publish {
                client_id: client_id.as_deref(),
                topic: &topic,
                payload: payload.as_ref().map_or(&[][..], |bytes| bytes.as_bytes()),
                qos,
                retain: truthy(&retain),
            });
            if !status.is_success() {
                return Err(Error::Publish { topic, status }.into());
            }
            Ok(true)
        },
    )?;
    inner.set("publish", publish.clone())?;
    inner.set("broker_publish", publish)?;

    let sink = Arc::clone(host);
    inner.set(
        "client_address",
        lua.create_function(move |_, handle: Value| {
            let client = client_ref(&handle)?;
            Ok(resolve(sink.client_address(client), client, "address")?)
        })?,
    )?;

    let sink = Arc::clone(host);
    inner.set(
        "client_id",
        lua.create_function(move |_, handle: Value| {
            let client = client_ref(&handle)?;
            Ok(resolve(sink.client_id(client), client, "client id")?)
        })?,
    )?;

    let sink = Arc::clone(host);
    inner.set(
        "client_username",
        lua.create_function(move |_, handle: Value| {
            let client = client_ref(&handle)?;
            Ok(resolve(sink.client_username(client), client, "username")?)
        })?,
    )?;

    let sink = Arc::clone(host);
    inner.set(
        "register",
        lua.create_function(move |lua, (kind, callback): (i64, Value)| {
            let callback = registry::callable(callback, "register callback")?;
            let kind = EventKind::from_raw(kind)?;
            registry::register(lua, sink.as_ref(), kind, callback)?;
            Ok(true)
        })?,
    )?;

    let sink = Arc::clone(host);
    inner.set(
        "unregister",
        lua.create_function(move |lua, kind: i64| {
            let kind = EventKind::from_raw(kind)?;
            Ok(registry::unregister(lua, sink.as_ref(), kind)?)
        })?,
    )?;

    let iterate: Function = lua.load(ENTRIES).set_name("=plug").call(inner.clone())?;
    let namespace = Namespace {
        name: global.to_string(),
        entries: lua.create_registry_value(inner)?,
        iterate: lua.create_registry_value(iterate)?,
    };
    lua.globals().set(global, lua.create_userdata(namespace)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standalone::{ClientInfo, StandaloneHost};

    fn setup() -> (Lua, Arc<StandaloneHost>) {
        let lua = Lua::new();
        registry::attach(&lua);
        let host = Arc::new(StandaloneHost::new());
        let dyn_host: Arc<dyn Host> = host.clone();
        install(&lua, &dyn_host, "plug").unwrap();
        (lua, host)
    }

    fn exec(lua: &Lua, chunk: &str) -> mlua::Result<()> {
        lua.load(chunk).exec()
    }

    #[test]
    fn constants_are_exported() {
        let (lua, _host) = setup();
        let (evt, log, acl, err): (i64, i64, i64, i64) = lua
            .load("return plug.EVT_MESSAGE, plug.LOG_ERR, plug.ACL_SUBSCRIBE, plug.ERR_ACL_DENIED")
            .eval()
            .unwrap();
        assert_eq!(evt, 6);
        assert_eq!(log, 0x08);
        assert_eq!(acl, 4);
        assert_eq!(err, 12);
    }

    #[test]
    fn namespace_is_frozen() {
        let (lua, _host) = setup();
        let err = exec(&lua, "plug.EVT_MESSAGE = 99").unwrap_err();
        assert!(err.to_string().contains("read-only"), "{err}");
        assert!(exec(&lua, "setmetatable(plug, {})").is_err());
        assert!(exec(&lua, "rawset(plug, 'EVT_MESSAGE', 99)").is_err());
        let hidden: bool = lua.load("return getmetatable(plug)").eval().unwrap();
        assert!(!hidden);
        let still: i64 = lua.load("return plug.EVT_MESSAGE").eval().unwrap();
        assert_eq!(still, 6);
    }

    #[test]
    fn pairs_does_not_hand_out_the_entries() {
        let (lua, _host) = setup();
        let (state, control): (Value, Value) = lua
            .load("local _, state, control = pairs(plug) return state, control")
            .eval()
            .unwrap();
        assert!(state.is_nil());
        assert!(control.is_nil());
    }

    #[test]
    fn namespace_reports_its_global_name() {
        let lua = Lua::new();
        registry::attach(&lua);
        let host: Arc<dyn Host> = Arc::new(StandaloneHost::new());
        install(&lua, &host, "broker").unwrap();
        let err = exec(&lua, "broker.publish = nil").unwrap_err();
        assert!(err.to_string().contains("broker.publish is read-only"), "{err}");
        let shown: String = lua.load("return tostring(broker)").eval().unwrap();
        assert_eq!(shown, "broker");
    }

    #[test]
    fn pairs_enumerates_real_entries() {
        let (lua, _host) = setup();
        let count: i64 = lua
            .load("local n = 0 for _ in pairs(plug) do n = n + 1 end return n")
            .eval()
            .unwrap();
        assert!(count > 20, "{count}");
    }

    #[test]
    fn log_forwards_unchecked_level() {
        let (lua, host) = setup();
        exec(&lua, "plug.log(plug.LOG_WARNING, 'careful')").unwrap();
        exec(&lua, "plug.log(1234, 'odd')").unwrap();
        assert!(host.logged(log_level::WARNING, "careful"));
        assert!(host.logged(1234, "odd"));
    }

    #[test]
    fn log_level_out_of_range_is_an_error() {
        let (lua, host) = setup();
        let err = exec(&lua, "plug.log(2^32 + 1, 'wrapped')").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(!host.logged(1, "wrapped"));
    }

    #[test]
    fn publish_with_nil_payload_sends_empty_message() {
        let (lua, host) = setup();
        let ok: bool = lua
            .load("return plug.publish(nil, 'status/up', nil)")
            .eval()
            .unwrap();
        assert!(ok);
        let published = host.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].client_id, None);
        assert_eq!(published[0].topic, "status/up");
        assert!(published[0].payload.is_empty());
        assert_eq!(published[0].qos, 0);
        assert!(!published[0].retain);
    }

    #[test]
    fn publish_passes_client_qos_retain_and_binary_payload() {
        let (lua, host) = setup();
        exec(&lua, "plug.broker_publish('c1', 't', 'a\\0b', 2, 1)").unwrap();
        let published = host.published();
        assert_eq!(published[0].client_id.as_deref(), Some("c1"));
        assert_eq!(published[0].payload, b"a\0b");
        assert_eq!(published[0].qos, 2);
        assert!(published[0].retain);
    }

    #[test]
    fn publish_rejects_bad_qos_without_calling_host() {
        let (lua, host) = setup();
        let err = exec(&lua, "plug.publish(nil, 't', 'x', 3)").unwrap_err();
        assert!(err.to_string().contains("qos"), "{err}");
        assert!(host.published().is_empty());
    }

    #[test]
    fn publish_failure_raises_script_error() {
        let (lua, host) = setup();
        host.set_publish_status(Some(StatusCode::from_raw(9)));
        let err = exec(&lua, "plug.publish(nil, 'big', 'x')").unwrap_err();
        assert!(matches!(
            Error::from_script(err),
            Error::Publish { status, .. } if status == StatusCode::from_raw(9)
        ));
    }

    #[test]
    fn publish_failure_can_be_caught_with_pcall() {
        let (lua, host) = setup();
        host.set_publish_status(Some(StatusCode::NOT_SUPPORTED));
        let ok: bool = lua
            .load("return (pcall(plug.publish, nil, 't', 'x'))")
            .eval()
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn register_rejects_non_callable() {
        let (lua, host) = setup();
        let err = exec(&lua, "plug.register(plug.EVT_MESSAGE, 'nope')").unwrap_err();
        assert!(matches!(
            Error::from_script(err),
            Error::NotCallable {
                type_name: "string",
                ..
            }
        ));
        assert!(host.subscriptions().is_empty());
    }

    #[test]
    fn register_rejects_unimplemented_and_unknown_kinds() {
        let (lua, _host) = setup();
        let err = exec(&lua, "plug.register(plug.EVT_CONTROL, function() end)").unwrap_err();
        assert!(matches!(
            Error::from_script(err),
            Error::UnsupportedEventKind(EventKind::Control)
        ));
        let err = exec(&lua, "plug.register(77, function() end)").unwrap_err();
        assert!(matches!(
            Error::from_script(err),
            Error::UnknownEventKind(77)
        ));
    }

    #[test]
    fn register_and_unregister_round_trip_from_script() {
        let (lua, host) = setup();
        let (registered, removed, again): (bool, bool, bool) = lua
            .load(
                r#"
                local a = plug.register(plug.EVT_TICK, function() end)
                local b = plug.unregister(plug.EVT_TICK)
                local c = plug.unregister(plug.EVT_TICK)
                return a, b, c
            "#,
            )
            .eval()
            .unwrap();
        assert!(registered);
        assert!(removed);
        assert!(!again);
        assert!(host.subscriptions().is_empty());
        assert!(registry::registered_kinds(&lua).unwrap().is_empty());
    }

    #[test]
    fn client_introspection_resolves_scoped_handles() {
        let (lua, host) = setup();
        let client = host.add_client(ClientInfo {
            id: "sensor-1".into(),
            address: Some("192.0.2.10".into()),
            username: Some("alice".into()),
        });
        let describe: mlua::Function = lua
            .load(
                "return function(c) return plug.client_id(c), plug.client_address(c), plug.client_username(c), tostring(c) end",
            )
            .eval()
            .unwrap();

        let (id, address, username, shown): (String, String, String, String) = lua
            .scope(|scope| {
                let handle = scope.create_userdata(ScriptClient(client))?;
                describe.call(handle)
            })
            .unwrap();
        assert_eq!(id, "sensor-1");
        assert_eq!(address, "192.0.2.10");
        assert_eq!(username, "alice");
        assert_eq!(shown, "plug.client");
    }

    #[test]
    fn client_handle_dies_with_its_scope() {
        let (lua, host) = setup();
        let client = host.add_client(ClientInfo {
            id: "c1".into(),
            ..ClientInfo::default()
        });
        let keep: mlua::Function = lua
            .load("return function(c) kept = c end")
            .eval()
            .unwrap();
        lua.scope(|scope| {
            let handle = scope.create_userdata(ScriptClient(client))?;
            keep.call::<_, ()>(handle)
        })
        .unwrap();

        let err = exec(&lua, "plug.client_id(kept)").unwrap_err();
        assert!(err.to_string().contains("after its event callback"), "{err}");
    }

    #[test]
    fn unresolvable_client_is_invalid() {
        let (lua, host) = setup();
        let client = host.add_client(ClientInfo {
            id: "c1".into(),
            ..ClientInfo::default()
        });
        let lookup: mlua::Function = lua
            .load("return function(c) return plug.client_address(c) end")
            .eval()
            .unwrap();
        let err = lua
            .scope(|scope| {
                let handle = scope.create_userdata(ScriptClient(client))?;
                lookup.call::<_, String>(handle)
            })
            .unwrap_err();
        assert!(matches!(Error::from_script(err), Error::InvalidClientRef(_)));

        let err = exec(&lua, "plug.client_id(42)").unwrap_err();
        assert!(err.to_string().contains("expected a client handle"), "{err}");
    }
}
