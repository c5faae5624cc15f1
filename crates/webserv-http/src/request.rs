use std::collections::BTreeMap;

use thiserror::Error;

/// A parsed HTTP request, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: String,
    path: String,
    version: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    query_string: String,
    cookies: BTreeMap<String, String>,
    remote_addr: String,
}

impl HttpRequest {
    /// Parse a raw request.
    ///
    /// The header block ends at the first blank line, everything after it is kept verbatim as
    /// the body. Header lines without a colon are skipped, and repeated keys keep the last
    /// value.
    pub fn parse(raw: &[u8], remote_addr: &str) -> Result<Self, ParseError> {
        let (head, body) = split_head(raw);
        let head = String::from_utf8_lossy(head);
        let mut lines = head.split('\n');

        // Request line, all three tokens required
        let line = lines.next().unwrap_or_default();
        let mut tokens = line.split_whitespace();
        let (Some(method), Some(target), Some(version)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ParseError::RequestLine);
        };

        let mut headers = BTreeMap::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            let key = key.trim_matches(|c| c == ' ' || c == '\t');
            let value = value.trim_matches(|c| c == ' ' || c == '\t' || c == '\r');
            headers.insert(key.to_string(), value.to_string());
        }

        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let cookies = headers
            .get("Cookie")
            .map(|header| parse_cookies(header))
            .unwrap_or_default();

        let value = Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
            body: body.to_vec(),
            query_string: query_string.to_string(),
            cookies,
            remote_addr: remote_addr.to_string(),
        };
        Ok(value)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a header value, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.headers.get(name) {
            return Some(value);
        }

        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Everything after the first `?` of the request target, empty if there's none.
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Serialize back into request bytes, with headers in map order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::new();

        data.extend_from_slice(self.method.as_bytes());
        data.push(b' ');
        data.extend_from_slice(self.path.as_bytes());
        if !self.query_string.is_empty() {
            data.push(b'?');
            data.extend_from_slice(self.query_string.as_bytes());
        }
        data.push(b' ');
        data.extend_from_slice(self.version.as_bytes());
        data.extend_from_slice(b"\r\n");

        for (key, value) in &self.headers {
            data.extend_from_slice(key.as_bytes());
            data.extend_from_slice(b": ");
            data.extend_from_slice(value.as_bytes());
            data.extend_from_slice(b"\r\n");
        }

        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(&self.body);

        data
    }
}

/// Split at the blank line ending the header block.
///
/// Without a blank line the whole input is the head.
fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut start = 0;

    while let Some(offset) = raw[start..].iter().position(|byte| *byte == b'\n') {
        let line = &raw[start..start + offset];
        let next = start + offset + 1;

        if line.is_empty() || line == b"\r" {
            return (&raw[..start], &raw[next..]);
        }

        start = next;
    }

    (raw, &[])
}

fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();

    for pair in header.split(';') {
        let pair = pair.trim_start_matches([' ', '\t']);
        if pair.is_empty() {
            continue;
        }

        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };

        let name = name.trim_end_matches([' ', '\t']);
        let value = value.trim_end_matches([' ', '\t']);
        cookies.insert(name.to_string(), value.to_string());
    }

    cookies
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    RequestLine,
}
