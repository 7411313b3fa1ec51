//! Node and peer identity types.
use std::fmt;

use crate::error::NodeError;

/// Maximum length, in bytes, of a WSS URL the node will store.
///
/// Mirrors the compile-time `MAX_WSURL_LEN` constant.
pub const MAX_WSURL_LEN: usize = 127;

/// A 6-byte virtual MAC identifying a node on the BACnet/SC network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vmac([u8; 6]);

impl Vmac {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Generate a fresh, locally-random VMAC.
    ///
    /// Called by the supervisor on `init` and on restart after a duplicate-VMAC
    /// collision.
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        fastrand::fill(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for Vmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// A 16-byte stable device identity, independent of the VMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceUuid(uuid::Uuid);

impl DeviceUuid {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for DeviceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bounded-length WSS URL.
///
/// Validated on construction: must parse as a URL and fit [`MAX_WSURL_LEN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WsUrl(String);

impl WsUrl {
    pub fn parse(raw: &str) -> Result<Self, NodeError> {
        if raw.is_empty() || raw.len() > MAX_WSURL_LEN {
            return Err(NodeError::BadParam("url length out of bounds"));
        }
        let parsed = url::Url::parse(raw).map_err(|_| NodeError::BadParam("invalid url"))?;
        if parsed.scheme() != "wss" && parsed.scheme() != "ws" {
            return Err(NodeError::BadParam("url must use ws or wss scheme"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmac_formats_as_colon_hex() {
        let vmac = Vmac::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(vmac.to_string(), "01:02:03:04:05:06");
    }

    #[test]
    fn random_vmacs_differ() {
        // Not a proof, but catches the obvious "forgot to randomize" regression.
        let a = Vmac::random();
        let b = Vmac::random();
        assert_ne!(a, b);
    }

    #[test]
    fn ws_url_rejects_bad_scheme() {
        assert!(WsUrl::parse("http://h1:9999").is_err());
        assert!(WsUrl::parse("wss://h1:9999").is_ok());
    }

    #[test]
    fn ws_url_rejects_oversized() {
        let long = format!("wss://{}", "a".repeat(MAX_WSURL_LEN));
        assert!(WsUrl::parse(&long).is_err());
    }
}
