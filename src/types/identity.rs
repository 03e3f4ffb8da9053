//! Request identity resolution
//!
//! Authentication happens upstream; civicgate receives either an
//! authenticated user id, a device fingerprint for anonymous flows, or a
//! bare IP as the last resort. The device token is treated as an opaque
//! 32-64 character value supplied by the client-side fingerprint provider.

use serde::{Deserialize, Serialize};

use super::error::{GateError, Result};

/// Who is making a request: an authenticated user, an anonymous device,
/// or (for rate limiting only) a raw IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    User(String),
    Device(String),
    Ip(String),
}

impl Identity {
    /// Wrap an authenticated user id
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    /// Validate and wrap a device fingerprint token
    pub fn device(token: &str) -> Result<Self> {
        if token.len() < 32 || token.len() > 64 {
            return Err(GateError::BadRequest(format!(
                "Device token must be 32-64 characters, got {}",
                token.len()
            )));
        }
        if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(GateError::BadRequest(
                "Device token must be alphanumeric".into(),
            ));
        }
        Ok(Self::Device(token.to_string()))
    }

    /// Wrap a raw IP address (anonymous fallback when no device token exists)
    pub fn ip(addr: impl Into<String>) -> Self {
        Self::Ip(addr.into())
    }

    /// Resolve the preferred identity: user id first, then device, then IP
    pub fn resolve(user_id: Option<&str>, device_token: Option<&str>, ip: &str) -> Result<Self> {
        if let Some(uid) = user_id {
            return Ok(Self::user(uid));
        }
        if let Some(token) = device_token {
            return Self::device(token);
        }
        Ok(Self::ip(ip))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Stable storage key, usable as a cache key part or document field
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("user:{}", id),
            Self::Device(id) => format!("device:{}", id),
            Self::Ip(addr) => format!("ip:{}", addr),
        }
    }

    /// Parse a storage key back into an identity
    pub fn from_key(key: &str) -> Result<Self> {
        match key.split_once(':') {
            Some(("user", id)) => Ok(Self::User(id.to_string())),
            Some(("device", id)) => Ok(Self::Device(id.to_string())),
            Some(("ip", addr)) => Ok(Self::Ip(addr.to_string())),
            _ => Err(GateError::BadRequest(format!("Malformed identity key: {}", key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_token_length() {
        assert!(Identity::device("short").is_err());
        let token = "a".repeat(40);
        assert!(Identity::device(&token).is_ok());
        let too_long = "a".repeat(65);
        assert!(Identity::device(&too_long).is_err());
    }

    #[test]
    fn test_device_token_charset() {
        let bad = format!("{}!", "a".repeat(39));
        assert!(Identity::device(&bad).is_err());
    }

    #[test]
    fn test_resolve_prefers_user() {
        let token = "b".repeat(32);
        let id = Identity::resolve(Some("u1"), Some(&token), "1.2.3.4").unwrap();
        assert_eq!(id, Identity::user("u1"));
        assert!(id.is_authenticated());

        let id = Identity::resolve(None, Some(&token), "1.2.3.4").unwrap();
        assert_eq!(id, Identity::Device(token));

        let id = Identity::resolve(None, None, "1.2.3.4").unwrap();
        assert_eq!(id, Identity::ip("1.2.3.4"));
        assert!(!id.is_authenticated());
    }

    #[test]
    fn test_key_round_trip() {
        let id = Identity::user("abc");
        assert_eq!(Identity::from_key(&id.key()).unwrap(), id);
        assert!(Identity::from_key("garbage").is_err());
    }
}
