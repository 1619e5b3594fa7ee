//! Event marshaling and callback invocation.

use crate::error::{Error, Result};
use crate::events::{ClientRef, EventPayload};
use crate::primitives::ScriptClient;
use crate::registry;
use crate::status::StatusCode;
use crate::translate;
use mlua::{Lua, MultiValue, Scope, Value};

/// Run the callback registered for `payload`'s kind and translate its result.
///
/// Kinds without a registration are answered with `NotSupported` without
/// touching script code. A fault raised by the callback is returned as
/// `ScriptRuntime`; it never unregisters the callback.
pub(crate) fn dispatch(lua: &Lua, payload: &EventPayload<'_>) -> Result<StatusCode> {
    let kind = payload.kind();
    let Some(callback) = registry::callback(lua, kind)? else {
        return Ok(StatusCode::NOT_SUPPORTED);
    };

    let returned = lua
        .scope(|scope| {
            let args = marshal(lua, scope, payload)?;
            callback.call::<_, MultiValue>(args)
        })
        .map_err(|err| Error::ScriptRuntime {
            message: err.to_string(),
        })?;

    translate::translate(kind, returned)
}

fn client_handle<'lua>(scope: &Scope<'lua, '_>, client: ClientRef) -> mlua::Result<Value<'lua>> {
    scope
        .create_userdata(ScriptClient(client))
        .map(Value::UserData)
}

fn text<'lua>(lua: &'lua Lua, value: Option<&str>) -> mlua::Result<Value<'lua>> {
    match value {
        Some(value) => lua.create_string(value).map(Value::String),
        None => Ok(Value::Nil),
    }
}

/// Positional callback arguments for each dispatchable kind.
fn marshal<'lua>(
    lua: &'lua Lua,
    scope: &Scope<'lua, '_>,
    payload: &EventPayload<'_>,
) -> mlua::Result<MultiValue<'lua>> {
    let args = match *payload {
        EventPayload::Message {
            client,
            topic,
            payload_len,
        } => vec![
            client_handle(scope, client)?,
            text(lua, Some(topic))?,
            Value::Integer(i64::from(payload_len)),
        ],
        EventPayload::Tick {
            now_s,
            now_ns,
            next_s,
            next_ns,
        } => vec![
            Value::Integer(now_s),
            Value::Integer(now_ns),
            Value::Integer(next_s),
            Value::Integer(next_ns),
        ],
        EventPayload::AclCheck {
            client,
            access,
            topic,
            qos,
            retain,
        } => vec![
            client_handle(scope, client)?,
            Value::Integer(access.raw()),
            text(lua, Some(topic))?,
            Value::Integer(i64::from(qos)),
            Value::Boolean(retain),
        ],
        EventPayload::BasicAuth {
            client,
            username,
            password,
        } => vec![
            client_handle(scope, client)?,
            text(lua, username)?,
            text(lua, password)?,
        ],
        EventPayload::Opaque(kind) => {
            return Err(Error::UnsupportedEventKind(kind).into());
        }
    };
    Ok(MultiValue::from_vec(args))
}
