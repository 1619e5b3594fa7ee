//! Event catalog and payloads delivered by the host broker.
//!
//! The catalog is closed: every kind the broker can fire has a variant here,
//! whether or not the bridge knows how to dispatch it. Payloads borrow from
//! the host and never outlive a single dispatch.

use crate::error::{Error, Result};
use std::fmt;

/// Every event kind the host broker defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Reload,
    AclCheck,
    BasicAuth,
    ExtAuthStart,
    ExtAuthContinue,
    Control,
    Message,
    PskKey,
    Tick,
    Disconnect,
}

impl EventKind {
    pub const ALL: [Self; 10] = [
        Self::Reload,
        Self::AclCheck,
        Self::BasicAuth,
        Self::ExtAuthStart,
        Self::ExtAuthContinue,
        Self::Control,
        Self::Message,
        Self::PskKey,
        Self::Tick,
        Self::Disconnect,
    ];

    /// Broker ABI number for this kind.
    pub const fn raw(self) -> i64 {
        match self {
            Self::Reload => 0,
            Self::AclCheck => 1,
            Self::BasicAuth => 2,
            Self::ExtAuthStart => 3,
            Self::ExtAuthContinue => 4,
            Self::Control => 5,
            Self::Message => 6,
            Self::PskKey => 7,
            Self::Tick => 8,
            Self::Disconnect => 9,
        }
    }

    pub fn from_raw(raw: i64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.raw() == raw)
            .ok_or(Error::UnknownEventKind(raw))
    }

    /// Name of the constant exported to scripts.
    pub const fn constant_name(self) -> &'static str {
        match self {
            Self::Reload => "EVT_RELOAD",
            Self::AclCheck => "EVT_ACL_CHECK",
            Self::BasicAuth => "EVT_BASIC_AUTH",
            Self::ExtAuthStart => "EVT_EXT_AUTH_START",
            Self::ExtAuthContinue => "EVT_EXT_AUTH_CONTINUE",
            Self::Control => "EVT_CONTROL",
            Self::Message => "EVT_MESSAGE",
            Self::PskKey => "EVT_PSK_KEY",
            Self::Tick => "EVT_TICK",
            Self::Disconnect => "EVT_DISCONNECT",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Reload => "reload",
            Self::AclCheck => "acl-check",
            Self::BasicAuth => "basic-auth",
            Self::ExtAuthStart => "ext-auth-start",
            Self::ExtAuthContinue => "ext-auth-continue",
            Self::Control => "control",
            Self::Message => "message",
            Self::PskKey => "psk-key",
            Self::Tick => "tick",
            Self::Disconnect => "disconnect",
        }
    }

    /// Whether the bridge can marshal, invoke and translate this kind.
    ///
    /// Scripts may only register for kinds where this returns `true`.
    pub const fn is_dispatchable(self) -> bool {
        match self {
            Self::Message | Self::Tick | Self::AclCheck | Self::BasicAuth => true,
            Self::Reload
            | Self::ExtAuthStart
            | Self::ExtAuthContinue
            | Self::Control
            | Self::PskKey
            | Self::Disconnect => false,
        }
    }

    /// Fails with `UnsupportedEventKind` for kinds without a dispatcher.
    pub fn ensure_dispatchable(self) -> Result<Self> {
        if self.is_dispatchable() {
            Ok(self)
        } else {
            Err(Error::UnsupportedEventKind(self))
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque, non-owned reference to a host connection.
///
/// The value is whatever the host uses to find the connection again (an
/// index into its client table, a pointer-sized token...). Scripts never see
/// the number: they get a scoped handle that dies with the dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientRef(u64);

impl ClientRef {
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    pub const fn token(self) -> u64 {
        self.0
    }
}

/// Access being checked by an ACL event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AclAccess {
    None,
    Read,
    Write,
    Subscribe,
    Unsubscribe,
}

impl AclAccess {
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Read,
        Self::Write,
        Self::Subscribe,
        Self::Unsubscribe,
    ];

    pub const fn raw(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Subscribe => 4,
            Self::Unsubscribe => 8,
        }
    }

    pub const fn constant_name(self) -> &'static str {
        match self {
            Self::None => "ACL_NONE",
            Self::Read => "ACL_READ",
            Self::Write => "ACL_WRITE",
            Self::Subscribe => "ACL_SUBSCRIBE",
            Self::Unsubscribe => "ACL_UNSUBSCRIBE",
        }
    }
}

impl std::str::FromStr for AclAccess {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            _ => Err(format!(
                "unknown acl access: {s}. Expected one of: none, read, write, subscribe, unsubscribe"
            )),
        }
    }
}

/// Event data handed over by the host, borrowed for one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload<'a> {
    Message {
        client: ClientRef,
        topic: &'a str,
        payload_len: u32,
    },
    Tick {
        now_s: i64,
        now_ns: i64,
        next_s: i64,
        next_ns: i64,
    },
    AclCheck {
        client: ClientRef,
        access: AclAccess,
        topic: &'a str,
        qos: u8,
        retain: bool,
    },
    BasicAuth {
        client: ClientRef,
        username: Option<&'a str>,
        password: Option<&'a str>,
    },
    /// A kind the bridge cannot unpack; carries only its tag.
    Opaque(EventKind),
}

impl EventPayload<'_> {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Message { .. } => EventKind::Message,
            Self::Tick { .. } => EventKind::Tick,
            Self::AclCheck { .. } => EventKind::AclCheck,
            Self::BasicAuth { .. } => EventKind::BasicAuth,
            Self::Opaque(kind) => *kind,
        }
    }

    pub const fn client(&self) -> Option<ClientRef> {
        match self {
            Self::Message { client, .. }
            | Self::AclCheck { client, .. }
            | Self::BasicAuth { client, .. } => Some(*client),
            Self::Tick { .. } | Self::Opaque(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_numbers_round_trip_through_catalog() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_raw(kind.raw()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_raw_number_is_rejected() {
        assert!(matches!(
            EventKind::from_raw(42),
            Err(Error::UnknownEventKind(42))
        ));
        assert!(EventKind::from_raw(-1).is_err());
    }

    #[test]
    fn only_four_kinds_are_dispatchable() {
        let dispatchable: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|kind| kind.is_dispatchable())
            .collect();
        assert_eq!(
            dispatchable,
            vec![
                EventKind::AclCheck,
                EventKind::BasicAuth,
                EventKind::Message,
                EventKind::Tick
            ]
        );
    }

    #[test]
    fn ensure_dispatchable_rejects_ext_auth() {
        assert!(matches!(
            EventKind::ExtAuthStart.ensure_dispatchable(),
            Err(Error::UnsupportedEventKind(EventKind::ExtAuthStart))
        ));
        assert_eq!(
            EventKind::Tick.ensure_dispatchable().unwrap(),
            EventKind::Tick
        );
    }

    #[test]
    fn payload_reports_kind_and_client() {
        let payload = EventPayload::AclCheck {
            client: ClientRef::new(7),
            access: AclAccess::Write,
            topic: "a/b",
            qos: 1,
            retain: false,
        };
        assert_eq!(payload.kind(), EventKind::AclCheck);
        assert_eq!(payload.client(), Some(ClientRef::new(7)));

        let tick = EventPayload::Tick {
            now_s: 1,
            now_ns: 2,
            next_s: 3,
            next_ns: 4,
        };
        assert_eq!(tick.client(), None);
    }

    #[test]
    fn acl_access_parses_case_insensitively() {
        assert_eq!("READ".parse::<AclAccess>().unwrap(), AclAccess::Read);
        assert_eq!(
            "unsubscribe".parse::<AclAccess>().unwrap().raw(),
            AclAccess::Unsubscribe.raw()
        );
        assert!("publish".parse::<AclAccess>().is_err());
    }
}
