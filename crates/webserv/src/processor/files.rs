use std::{
    fmt::Write as _,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use tracing::{event, Level};
use webserv_http::{HttpRequest, HttpResponse};

use super::resource::url_decode;

const DEFAULT_UPLOAD_NAME: &str = "upload.data";

/// MIME type of a file, by extension.
pub fn mime_type(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    }
}

/// Outcome of looking up a file for GET.
pub enum FileLookup {
    File(HttpResponse),
    Directory,
    Missing,
    Unreadable,
}

pub fn read_file(path: &str) -> FileLookup {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return FileLookup::Missing,
    };

    if metadata.is_dir() {
        return FileLookup::Directory;
    }

    match fs::read(path) {
        Ok(contents) => FileLookup::File(HttpResponse::ok(contents, mime_type(path))),
        Err(error) => {
            event!(Level::WARN, path, ?error, "failed to read file");
            FileLookup::Unreadable
        }
    }
}

/// Render an HTML listing of a directory, entries sorted by name.
pub fn autoindex(path: &str) -> Result<HttpResponse, std::io::Error> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        entries.push((name, metadata));
    }
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let title = escape_html(path);
    let mut html = format!(
        "<html><head><title>Index of {0}</title></head><body><h1>Index of {0}</h1><ul>",
        title
    );

    for (name, metadata) in entries {
        let name = escape_html(&name);
        let (href, size) = if metadata.is_dir() {
            (format!("{}/", name), "[DIR]".to_string())
        } else {
            (name.clone(), format!("{} bytes", metadata.len()))
        };
        let modified = metadata
            .modified()
            .map(|time| DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();

        let _ = write!(
            html,
            "<li><a href=\"{}\">{}</a> &nbsp; {} &nbsp; {}</li>",
            href, name, size, modified
        );
    }

    html.push_str("</ul></body></html>");
    Ok(HttpResponse::ok(html, "text/html"))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// File name and content of an upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Upload {
    /// Extract the upload from a request.
    ///
    /// A `multipart/form-data` body contributes the first part's payload and its `filename`.
    /// Any other body is stored whole, named after the last segment of the request path.
    pub fn from_request(request: &HttpRequest) -> Self {
        let multipart = request
            .header("Content-Type")
            .is_some_and(|value| value.to_ascii_lowercase().starts_with("multipart/form-data"));

        let (filename, content) = if multipart {
            let filename = multipart_filename(request.body());
            let content = multipart_payload(request.body()).unwrap_or(request.body());
            (filename, content)
        } else {
            (None, request.body())
        };

        let filename = filename
            .and_then(|name| sanitize_name(&name))
            .or_else(|| {
                let segment = request.path().rsplit('/').next().unwrap_or_default();
                sanitize_name(&url_decode(segment))
            })
            .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());

        Self {
            filename,
            content: content.to_vec(),
        }
    }
}

fn multipart_filename(body: &[u8]) -> Option<String> {
    const MARKER: &[u8] = b"filename=\"";

    let start = webserv_http::framing::find(body, MARKER)? + MARKER.len();
    let length = body[start..].iter().position(|&b| b == b'"')?;

    Some(String::from_utf8_lossy(&body[start..start + length]).into_owned())
}

/// Payload of the first part, between its header block and the next boundary line.
fn multipart_payload(body: &[u8]) -> Option<&[u8]> {
    use webserv_http::framing::find;

    let start = match find(body, b"\r\n\r\n") {
        Some(index) => index + 4,
        None => find(body, b"\n\n")? + 2,
    };
    let rest = &body[start..];

    let end = find(rest, b"\r\n--")
        .or_else(|| find(rest, b"\n--"))
        .unwrap_or(rest.len());
    let mut payload = &rest[..end];

    if let Some(stripped) = payload.strip_suffix(b"\r\n") {
        payload = stripped;
    } else if let Some(stripped) = payload.strip_suffix(b"\n") {
        payload = stripped;
    }

    Some(payload)
}

/// Keep only the final component of a client-supplied name.
fn sanitize_name(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    Some(name.to_string())
}

/// Write an upload into `store`, renaming it to `base_N.ext` if the name is taken.
pub fn store_upload(store: &Path, upload: &Upload) -> Result<PathBuf, std::io::Error> {
    let mut target = store.join(&upload.filename);

    let (base, extension) = match upload.filename.rfind('.') {
        Some(index) if index > 0 => upload.filename.split_at(index),
        _ => (upload.filename.as_str(), ""),
    };

    let mut counter = 1;
    while target.exists() {
        target = store.join(format!("{}_{}{}", base, counter, extension));
        counter += 1;
    }

    fs::write(&target, &upload.content)?;
    Ok(target)
}

/// Outcome of a DELETE.
pub enum Deletion {
    Deleted,
    Missing,
    Failed,
}

pub fn delete_file(path: &str) -> Deletion {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Deletion::Missing,
        Err(_) => return Deletion::Failed,
    };

    let result = if metadata.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Deletion::Deleted,
        Err(error) => {
            event!(Level::WARN, path, ?error, "failed to delete file");
            Deletion::Failed
        }
    }
}
