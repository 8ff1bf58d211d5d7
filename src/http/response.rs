use crate::http::types::StatusCode;

/// Builder for the responses the server puts on the wire.
///
/// Serialization is a status line, the accumulated headers in insertion
/// order, a blank line, and the optional body. Content headers are never
/// implied; callers add them via [`set_content_headers`](Self::set_content_headers)
/// or [`set_body`](Self::set_body).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInfo {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: String,
}

impl ResponseInfo {
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn for_404() -> Self {
        let mut response = Self::new(StatusCode::NotFound);
        response.set_body("", "text/html");
        response
    }

    pub fn for_500(message: &str) -> Self {
        let mut response = Self::new(StatusCode::InternalServerError);
        response.set_body(message, "text/html");
        response
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn set_content_headers(&mut self, content_length: usize, content_type: &str) -> &mut Self {
        self.add_header("Content-Length", &content_length.to_string())
            .add_header("Content-Type", content_type)
    }

    pub fn set_body(&mut self, body: &str, content_type: &str) -> &mut Self {
        self.set_content_headers(body.len(), content_type);
        self.body = body.to_string();
        self
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.status.status_line());
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);

        out
    }
}

#[cfg(test)]
mod response_self {
    use super::*;

    #[test]
    fn plain_headers() {
        let mut response = ResponseInfo::new(StatusCode::Ok);
        response.add_header("X-Probe", "1");

        assert_eq!(response.serialize(), "HTTP/1.1 200 OK\r\nX-Probe: 1\r\n\r\n");
    }

    #[test]
    fn content_headers() {
        let mut response = ResponseInfo::new(StatusCode::Ok);
        response.set_content_headers(4, "text/plain");

        assert_eq!(
            response.serialize(),
            "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nContent-Type: text/plain\r\n\r\n"
        );
    }

    #[test]
    fn for_500_carries_message() {
        let response = ResponseInfo::for_500("request content-length too big or unknown.");
        let wire = response.serialize();

        assert!(wire.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(wire.contains("Content-Type: text/html\r\n"));
        assert!(wire.ends_with("\r\n\r\nrequest content-length too big or unknown."));
    }

    #[test]
    fn for_404_is_empty_bodied() {
        let wire = ResponseInfo::for_404().serialize();

        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }
}
