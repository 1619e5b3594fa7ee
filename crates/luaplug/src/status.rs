//! Host status codes.
//!
//! The broker speaks plain `i32` result codes. Scripts may hand back any
//! code they like through the explicit-code return form, so the bridge keeps
//! the raw value and only names the ones it produces itself.

use std::fmt;

/// Result code understood by the host broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const INVALID_ARGUMENT: Self = Self(3);
    pub const NOT_SUPPORTED: Self = Self(10);
    pub const AUTH_FAILURE: Self = Self(11);
    pub const ACL_DENIED: Self = Self(12);
    pub const GENERIC_FAILURE: Self = Self(13);
    pub const DEFER: Self = Self(17);

    /// Every named code, in the order they are exported to scripts.
    pub const NAMED: [(&'static str, Self); 7] = [
        ("ERR_SUCCESS", Self::SUCCESS),
        ("ERR_INVAL", Self::INVALID_ARGUMENT),
        ("ERR_NOT_SUPPORTED", Self::NOT_SUPPORTED),
        ("ERR_AUTH", Self::AUTH_FAILURE),
        ("ERR_ACL_DENIED", Self::ACL_DENIED),
        ("ERR_UNKNOWN", Self::GENERIC_FAILURE),
        ("ERR_PLUGIN_DEFER", Self::DEFER),
    ];

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == Self::SUCCESS.0
    }

    /// Human-readable label, `None` for codes the bridge does not name.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::SUCCESS => Some("success"),
            Self::INVALID_ARGUMENT => Some("invalid argument"),
            Self::NOT_SUPPORTED => Some("not supported"),
            Self::AUTH_FAILURE => Some("authentication failed"),
            Self::ACL_DENIED => Some("access denied"),
            Self::GENERIC_FAILURE => Some("unknown error"),
            Self::DEFER => Some("deferred"),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{label} ({})", self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_codes_match_broker_abi() {
        assert_eq!(StatusCode::SUCCESS.raw(), 0);
        assert_eq!(StatusCode::INVALID_ARGUMENT.raw(), 3);
        assert_eq!(StatusCode::NOT_SUPPORTED.raw(), 10);
        assert_eq!(StatusCode::AUTH_FAILURE.raw(), 11);
        assert_eq!(StatusCode::ACL_DENIED.raw(), 12);
        assert_eq!(StatusCode::GENERIC_FAILURE.raw(), 13);
        assert_eq!(StatusCode::DEFER.raw(), 17);
    }

    #[test]
    fn display_falls_back_to_raw_value() {
        assert_eq!(StatusCode::ACL_DENIED.to_string(), "access denied (12)");
        assert_eq!(StatusCode::from_raw(42).to_string(), "status 42");
    }

    #[test]
    fn only_zero_is_success() {
        assert!(StatusCode::from_raw(0).is_success());
        assert!(!StatusCode::from_raw(42).is_success());
        assert!(!StatusCode::DEFER.is_success());
    }
}
