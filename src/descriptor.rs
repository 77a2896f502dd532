//! Request and response descriptors exchanged with a resolver.
//!
//! A [`RequestDescriptor`] is built fresh for every data event read from a
//! connection. Payloads are kept as raw bytes: a chunk that is not valid
//! UTF-8 is passed through untouched, and [`RequestDescriptor::text`] decodes
//! it lossily instead of failing.

use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::net::SocketAddr;

/// Format a peer address as `<host>:<port>`.
pub fn socket_name(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// One inbound data event, as handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    request_from: String,
    #[serde(serialize_with = "serialize_lossy")]
    data: Bytes,
}

impl RequestDescriptor {
    pub fn new(request_from: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            request_from: request_from.into(),
            data: data.into(),
        }
    }

    /// Build a descriptor for a chunk received from `peer`.
    pub fn from_peer(peer: &SocketAddr, data: Bytes) -> Self {
        Self::new(socket_name(peer), data)
    }

    /// Origin of the data, `<host>:<port>`.
    pub fn request_from(&self) -> &str {
        &self.request_from
    }

    /// The payload exactly as it was read.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// The payload as UTF-8 text. Invalid sequences become U+FFFD; use
    /// [`data`](Self::data) for the verbatim bytes.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// `false` when the payload is a decode anomaly (not valid UTF-8).
    pub fn is_valid_utf8(&self) -> bool {
        std::str::from_utf8(&self.data).is_ok()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// Bytes the resolver wants written back to the originating connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseDescriptor {
    #[serde(serialize_with = "serialize_lossy")]
    data: Bytes,
}

impl ResponseDescriptor {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// A response that writes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<&'static str> for ResponseDescriptor {
    fn from(data: &'static str) -> Self {
        Self::new(data)
    }
}

impl From<String> for ResponseDescriptor {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for ResponseDescriptor {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for ResponseDescriptor {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

fn serialize_lossy<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_name() {
        let v4: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        assert_eq!(socket_name(&v4), "10.0.0.7:51234");

        let v6: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(socket_name(&v6), "::1:8080");
    }

    #[test]
    fn test_request_from_peer() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let request = RequestDescriptor::from_peer(&peer, Bytes::from_static(b"ping"));
        assert_eq!(request.request_from(), "127.0.0.1:4000");
        assert_eq!(request.text(), "ping");
        assert!(request.is_valid_utf8());
    }

    #[test]
    fn test_invalid_utf8_passes_through() {
        let raw = Bytes::from_static(&[0x66, 0x6f, 0xff, 0xfe, 0x6f]);
        let request = RequestDescriptor::new("127.0.0.1:1", raw.clone());

        assert!(!request.is_valid_utf8());
        assert_eq!(request.data(), &raw);
        assert_eq!(request.text(), "fo\u{fffd}\u{fffd}o");
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = RequestDescriptor::new("127.0.0.1:9", "hello");
        let rendered = toml::to_string(&request).unwrap();
        assert!(rendered.contains("requestFrom = \"127.0.0.1:9\""));
        assert!(rendered.contains("data = \"hello\""));
    }

    #[test]
    fn test_response_conversions() {
        assert_eq!(ResponseDescriptor::from("pong").data().as_ref(), b"pong");
        assert_eq!(
            ResponseDescriptor::from(vec![1u8, 2, 3]).into_data().as_ref(),
            &[1, 2, 3]
        );
        assert!(ResponseDescriptor::empty().is_empty());
    }
}
