use webserv_http::{framing::find, HttpResponse};

const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// What a CGI script wrote to its stdout, split into content type and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiOutput {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl CgiOutput {
    /// Split raw script output at the first blank line.
    ///
    /// The header part may carry a `Content-Type` line, anything else in it is ignored. Output
    /// without a blank line is all body.
    pub fn parse(raw: &[u8]) -> Self {
        let split = find(raw, b"\r\n\r\n")
            .map(|position| (position, 4))
            .or_else(|| find(raw, b"\n\n").map(|position| (position, 2)));

        let (headers, body) = match split {
            Some((position, separator)) => (&raw[..position], &raw[position + separator..]),
            None => (&raw[..0], raw),
        };

        let headers = String::from_utf8_lossy(headers);
        let content_type = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("Content-Type")
                    .then(|| value.trim_matches([' ', '\t', '\r']).to_string())
            })
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        Self {
            content_type,
            body: body.to_vec(),
        }
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse::ok(self.body, &self.content_type)
    }
}
