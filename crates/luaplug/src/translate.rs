//! Callback return values → host status codes.
//!
//! Two conventions are in use, chosen by event kind:
//!
//! * fire-and-forget (`message`, `tick`): whatever the callback returns is
//!   ignored, finishing without a fault means success;
//! * boolean-or-code (`acl-check`, `basic-auth`): a single value is read as a
//!   boolean (`true` → success, `false` → the kind's denial code), two or
//!   more values are read as `(ignored, code)` and `code` is passed to the
//!   host verbatim. Returning nothing is a malformed return, never an
//!   implicit allow or deny.

use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::status::StatusCode;
use mlua::{MultiValue, Value};

/// How a kind's callback result is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnConvention {
    FireAndForget,
    BooleanOrCode { denied: StatusCode },
}

impl ReturnConvention {
    /// `None` for kinds the bridge does not dispatch.
    pub const fn for_kind(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Message | EventKind::Tick => Some(Self::FireAndForget),
            EventKind::AclCheck => Some(Self::BooleanOrCode {
                denied: StatusCode::ACL_DENIED,
            }),
            EventKind::BasicAuth => Some(Self::BooleanOrCode {
                denied: StatusCode::AUTH_FAILURE,
            }),
            EventKind::Reload
            | EventKind::ExtAuthStart
            | EventKind::ExtAuthContinue
            | EventKind::Control
            | EventKind::PskKey
            | EventKind::Disconnect => None,
        }
    }
}

/// Translate what a `kind` callback returned.
pub fn translate(kind: EventKind, returned: MultiValue<'_>) -> Result<StatusCode> {
    let convention =
        ReturnConvention::for_kind(kind).ok_or(Error::UnsupportedEventKind(kind))?;
    let values = returned.into_vec();

    match convention {
        ReturnConvention::FireAndForget => Ok(StatusCode::SUCCESS),
        ReturnConvention::BooleanOrCode { denied } => match values.as_slice() {
            [] => Err(Error::MalformedCallbackReturn {
                kind,
                reason: "callback returned no values".to_string(),
            }),
            [single] => Ok(if truthy(single) {
                StatusCode::SUCCESS
            } else {
                denied
            }),
            [_, code, ..] => explicit_code(code)
                .map(StatusCode::from_raw)
                .ok_or_else(|| Error::MalformedCallbackReturn {
                    kind,
                    reason: format!(
                        "second return value must be an integer status code, got {}",
                        describe(code)
                    ),
                }),
        },
    }
}

/// Lua truthiness: only `nil` and `false` are false.
pub(crate) fn truthy(value: &Value<'_>) -> bool {
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Read a status code the way Lua would coerce it to an integer.
fn explicit_code(value: &Value<'_>) -> Option<i32> {
    match value {
        Value::Integer(int) => i32::try_from(*int).ok(),
        Value::Number(num) => float_to_code(*num),
        Value::String(text) => {
            let text = text.to_str().ok()?.trim();
            match text.parse::<i64>() {
                Ok(int) => i32::try_from(int).ok(),
                Err(_) => float_to_code(text.parse::<f64>().ok()?),
            }
        }
        _ => None,
    }
}

fn float_to_code(num: f64) -> Option<i32> {
    let in_range = num >= f64::from(i32::MIN) && num <= f64::from(i32::MAX);
    (num.fract() == 0.0 && in_range).then(|| num as i32)
}

fn describe(value: &Value<'_>) -> String {
    match value {
        Value::Integer(int) => format!("out-of-range integer {int}"),
        Value::Number(num) => format!("number {num}"),
        Value::String(text) => format!("string {:?}", text.to_string_lossy()),
        other => other.type_name().to_string(),
    }
}
