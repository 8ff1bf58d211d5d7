use std::{collections::BTreeMap, net::SocketAddr};

/// Meta information about one parsed HTTP request.
///
/// Geared toward servers: headers live in a map of lowercase field names to
/// comma-joined values rather than a raw header list, so delegates can do
/// O(log n) lookups without re-scanning the wire bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    /// Peer address, stamped by the server once the prelude is complete.
    pub peer: Option<SocketAddr>,

    /// Request method, verbatim from the request line.
    pub method: String,

    /// Request path, verbatim from the request line.
    pub path: String,

    /// Field names are lowercased on insertion; a repeated field name
    /// produces a single comma-joined value
    /// ([RFC 7230 section 3.2.2](https://tools.ietf.org/html/rfc7230#section-3.2.2)).
    pub headers: BTreeMap<String, String>,

    /// Request body, exactly `content-length` bytes.
    pub data: Vec<u8>,
}

impl RequestInfo {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `header_name`, which must already be lower case.
    #[inline]
    pub fn header_value(&self, header_name: &str) -> Option<&str> {
        self.headers.get(header_name).map(String::as_str)
    }

    /// Checks for an item in a comma-separated header value. Both
    /// `header_name` and `header_value` must be lower case.
    ///
    /// `Connection: SomethingElse, Upgrade` matches `("connection", "upgrade")`.
    pub fn has_header_value(&self, header_name: &str, header_value: &str) -> bool {
        let Some(value) = self.header_value(header_name) else {
            return false;
        };

        value
            .split(',')
            .any(|item| item.trim().eq_ignore_ascii_case(header_value))
    }

    /// `connection: upgrade` together with `upgrade: websocket`.
    #[inline]
    pub(crate) fn is_websocket_upgrade(&self) -> bool {
        self.has_header_value("connection", "upgrade")
            && self.has_header_value("upgrade", "websocket")
    }
}

#[cfg(test)]
mod request_self {
    use super::*;

    fn with_headers(headers: &[(&str, &str)]) -> RequestInfo {
        let mut request = RequestInfo::new();
        for (name, value) in headers {
            request.headers.insert(name.to_string(), value.to_string());
        }
        request
    }

    #[test]
    fn header_value() {
        let request = with_headers(&[("x-a", "2,4"), ("x-b", "3")]);

        assert_eq!(request.header_value("x-a"), Some("2,4"));
        assert_eq!(request.header_value("x-b"), Some("3"));
        assert_eq!(request.header_value("x-c"), None);
    }

    #[test]
    fn has_header_value() {
        #[rustfmt::skip]
        let cases = [
            ("upgrade",    "websocket",  "websocket",               true),
            ("upgrade",    "WebSocket",  "websocket",               true),
            ("connection", "Upgrade",    "upgrade",                 true),
            ("connection", "SomethingElse, Upgrade", "upgrade",     true),
            ("connection", " keep-alive ,  upgrade", "upgrade",     true),
            ("connection", "keep-alive", "upgrade",                 false),
            ("connection", "upgraded",   "upgrade",                 false),
        ];

        for (name, stored, wanted, expected) in cases {
            let request = with_headers(&[(name, stored)]);
            assert_eq!(request.has_header_value(name, wanted), expected, "{stored}");
        }
    }

    #[test]
    fn websocket_upgrade() {
        let request = with_headers(&[
            ("connection", "SomethingElse, Upgrade"),
            ("upgrade", "WebSocket"),
        ]);
        assert!(request.is_websocket_upgrade());

        let request = with_headers(&[("connection", "upgrade")]);
        assert!(!request.is_websocket_upgrade());
    }
}
