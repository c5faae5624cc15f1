//! Locating message boundaries in a raw HTTP/1.1 byte stream.

/// Blank line separating the header block from the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const CRLF: &[u8] = b"\r\n";
const CHUNKED_MARKER: &[u8] = b"Transfer-Encoding: chunked";
const CONTENT_LENGTH: &[u8] = b"Content-Length:";

/// Find the first position of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the header block including its terminator, if the terminator has arrived.
pub fn header_length(buffer: &[u8]) -> Option<usize> {
    find(buffer, HEADER_TERMINATOR).map(|position| position + HEADER_TERMINATOR.len())
}

/// Check the raw header block for chunked transfer encoding.
///
/// This is a case-sensitive substring match, other spellings are not recognized.
pub fn is_chunked(headers: &[u8]) -> bool {
    find(headers, CHUNKED_MARKER).is_some()
}

/// Declared body length of the raw header block.
///
/// Leading spaces and tabs are skipped, and the value ends at the first non-digit. Absent or
/// malformed values, meaning no digits at all, give a zero-length body.
pub fn content_length(headers: &[u8]) -> usize {
    let Some(position) = find(headers, CONTENT_LENGTH) else {
        return 0;
    };

    let value = &headers[position + CONTENT_LENGTH.len()..];
    let start = value
        .iter()
        .position(|byte| *byte != b' ' && *byte != b'\t')
        .unwrap_or(value.len());
    let digits = &value[start..];
    let end = digits
        .iter()
        .position(|byte| !byte.is_ascii_digit())
        .unwrap_or(digits.len());

    std::str::from_utf8(&digits[..end])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Framing state of a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedBody {
    /// The terminal chunk hasn't fully arrived yet.
    Partial,
    /// Length of the complete body, including the terminal zero-size chunk and any trailer
    /// lines.
    Complete(usize),
    /// A chunk size that can't be represented, the body can never complete.
    Malformed,
}

/// Find the end of a chunked body at the start of `body`.
pub fn chunked_length(body: &[u8]) -> ChunkedBody {
    let mut position = 0;

    loop {
        let Some(offset) = find(&body[position..], CRLF) else {
            return ChunkedBody::Partial;
        };
        let line_end = position + offset;
        let Some(size) = chunk_size(&body[position..line_end]) else {
            return ChunkedBody::Malformed;
        };
        position = line_end + CRLF.len();

        if size == 0 {
            break;
        }

        let Some(end) = position
            .checked_add(size)
            .and_then(|end| end.checked_add(CRLF.len()))
        else {
            return ChunkedBody::Malformed;
        };
        if end > body.len() {
            return ChunkedBody::Partial;
        }
        position = end;
    }

    // Trailer lines, up to and including the final empty line
    loop {
        let Some(offset) = find(&body[position..], CRLF) else {
            return ChunkedBody::Partial;
        };
        let line_end = position + offset;
        let empty = line_end == position;
        position = line_end + CRLF.len();

        if empty {
            return ChunkedBody::Complete(position);
        }
    }
}

/// Decode a chunk sequence into its contiguous payload.
///
/// Each chunk is a hex size line, CRLF, that many raw bytes, and CRLF. Decoding stops at the
/// first zero-size chunk, or at the first chunk that isn't fully present.
pub fn decode_chunked(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    let mut position = 0;

    while position < data.len() {
        let Some(offset) = find(&data[position..], CRLF) else {
            break;
        };

        let size = chunk_size(&data[position..position + offset]).unwrap_or(0);
        if size == 0 {
            break;
        }
        position += offset + CRLF.len();

        let Some(end) = position.checked_add(size) else {
            break;
        };
        if end > data.len() {
            break;
        }

        decoded.extend_from_slice(&data[position..end]);
        position = end + CRLF.len();
    }

    decoded
}

/// Parse the leading hex digits of a chunk size line, ignoring chunk extensions.
///
/// A line without hex digits reads as zero, an overflowing size as `None`.
fn chunk_size(line: &[u8]) -> Option<usize> {
    let start = line
        .iter()
        .position(|byte| *byte != b' ' && *byte != b'\t')
        .unwrap_or(line.len());

    let mut size: usize = 0;
    for byte in &line[start..] {
        let Some(digit) = (*byte as char).to_digit(16) else {
            break;
        };

        size = size.checked_mul(16)?.checked_add(digit as usize)?;
    }

    Some(size)
}
