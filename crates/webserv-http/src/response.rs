use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

const HTTP_VERSION: &str = "HTTP/1.1";
const DEFAULT_MIME: &str = "text/html";

/// An HTTP response, built up by handlers and serialized once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    version: String,
    status: u16,
    reason: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    cookies: Vec<String>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            cookies: Vec::new(),
        }
    }
}

impl HttpResponse {
    /// 200 response with the given body, `text/html` if no MIME type is given.
    pub fn ok(body: impl Into<Vec<u8>>, mime: &str) -> Self {
        let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };

        let mut value = Self::default();
        value.set_header("Content-Type", mime);
        value.body = body.into();
        value
    }

    /// Response with the fixed reason phrase and default HTML body of a status code.
    ///
    /// 204 responses carry no body.
    pub fn with_status(status: u16) -> Self {
        let mut value = Self::error(status, reason_phrase(status));

        if status == 204 {
            value.body.clear();
        }

        value
    }

    /// Response for any status code with a custom reason phrase.
    pub fn error(status: u16, reason: &str) -> Self {
        let mut value = Self {
            status,
            reason: reason.to_string(),
            ..Self::default()
        };

        value.set_header("Content-Type", DEFAULT_MIME);
        value.body = format!("<html><body>{} {}</body></html>", status, reason).into_bytes();
        value
    }

    /// Redirect to `target`, "Moved Permanently" for 301 and "Found" for anything else.
    pub fn redirect(status: u16, target: &str) -> Self {
        let reason = if status == 301 {
            "Moved Permanently"
        } else {
            "Found"
        };

        let mut value = Self {
            status,
            reason: reason.to_string(),
            ..Self::default()
        };

        value.set_header("Location", target);
        value.set_header("Content-Type", DEFAULT_MIME);
        value.body = format!(
            "<html><body>{} Redirect to <a href=\"{}\">{}</a></body></html>",
            status, target, target
        )
        .into_bytes();
        value
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// `Set-Cookie` values, in the order they were added.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    pub fn set_cookie(&mut self, name: &str, value: &str, max_age: i64, path: &str) {
        let cookie = format!(
            "{}={}; Path={}; Max-Age={}; HttpOnly",
            name, value, path, max_age
        );
        self.cookies.push(cookie);
    }

    /// Make the client drop a cookie right away.
    pub fn expire_cookie(&mut self, name: &str) {
        self.cookies.push(format!("{}=; Path=/; Max-Age=0", name));
    }

    /// Serialize into the bytes sent on the wire.
    ///
    /// `Content-Length` is computed from the body unless it was set explicitly.
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = BytesMut::with_capacity(256 + self.body.len());

        let status_line = format!("{} {} {}\r\n", self.version, self.status, self.reason);
        data.put(status_line.as_bytes());

        if !self.headers.contains_key("Content-Length") {
            data.put(&b"Content-Length: "[..]);
            data.put(self.body.len().to_string().as_bytes());
            data.put(&b"\r\n"[..]);
        }

        for (key, value) in &self.headers {
            data.put(key.as_bytes());
            data.put(&b": "[..]);
            data.put(value.as_bytes());
            data.put(&b"\r\n"[..]);
        }

        for cookie in &self.cookies {
            data.put(&b"Set-Cookie: "[..]);
            data.put(cookie.as_bytes());
            data.put(&b"\r\n"[..]);
        }

        data.put(&b"\r\n"[..]);
        data.put(&self.body[..]);

        data.to_vec()
    }
}

/// Fixed reason phrase of a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Error",
    }
}
