use std::path::Path;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use webserv_config::{LocationConfig, ServerConfig};

/// Decode `%XX` escapes and `+` as space.
///
/// Invalid escapes are kept as they are.
pub fn url_decode(value: &str) -> String {
    let value = value.replace('+', " ");
    percent_decode_str(&value).decode_utf8_lossy().into_owned()
}

/// Map a request path onto the filesystem.
///
/// The location prefix is stripped and the remainder is appended to the location (or server)
/// root. Directory paths get the index file appended when it exists, except in CGI locations.
pub fn resource_path(
    server: &ServerConfig,
    location: Option<&LocationConfig>,
    request_path: &str,
) -> Result<String, ResourceError> {
    let decoded = url_decode(request_path);
    if decoded.split('/').any(|segment| segment == "..") {
        return Err(ResourceError::Traversal);
    }

    let root = server.root_for(location);
    let prefix = location.map_or("/", |location| location.path.as_str());
    let mut rest = decoded
        .strip_prefix(prefix)
        .unwrap_or(&decoded)
        .to_string();

    let is_cgi = location.is_some_and(|location| location.cgi.is_some());
    if (rest.is_empty() || rest.ends_with('/')) && !is_cgi {
        let index = location
            .and_then(|location| location.index.as_deref())
            .unwrap_or(&server.index);

        let candidate = join(root, &format!("{}{}", rest, index));
        if Path::new(&candidate).exists() {
            rest.push_str(index);
        }
    }

    Ok(join(root, &rest))
}

/// Join a root and a relative path with exactly one `/` between them.
fn join(root: &str, rest: &str) -> String {
    match (root.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{}{}", root, &rest[1..]),
        (false, false) if !root.is_empty() && !rest.is_empty() => format!("{}/{}", root, rest),
        _ => format!("{}{}", root, rest),
    }
}

/// Find where the script part of `path` ends for a CGI extension.
///
/// The extension must be followed by the end of the path or a `/`. Returns the byte offset
/// just past the extension.
pub fn script_end(path: &str, extension: &str) -> Option<usize> {
    if extension.is_empty() {
        return None;
    }

    path.match_indices(extension)
        .map(|(start, _)| start + extension.len())
        .find(|&end| end == path.len() || path[end..].starts_with('/'))
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    #[error("request path escapes the document root")]
    Traversal,
}

#[cfg(test)]
mod tests {
    use devutils::Site;

    use super::*;

    fn given_server(root: &str, locations: &[&str]) -> ServerConfig {
        let mut server = ServerConfig {
            root: root.to_string(),
            ..ServerConfig::default()
        };
        for path in locations {
            server
                .locations
                .push(LocationConfig::new(*path, server.client_max_body_size));
        }
        server
    }

    #[test]
    fn decode_escapes_and_plus() {
        assert_eq!(url_decode("/a%20b+c"), "/a b c");
        assert_eq!(url_decode("/%2B"), "/+");
        assert_eq!(url_decode("/100%zz"), "/100%zz");
    }

    #[test]
    fn strips_location_prefix() {
        let mut server = given_server("www/", &["/", "/images"]);
        server.locations[1].root = Some("static/img".to_string());

        let location = server.find_location("/images/cat.png");
        let path = resource_path(&server, location, "/images/cat.png").unwrap();
        assert_eq!(path, "static/img/cat.png");

        let location = server.find_location("/about.html");
        let path = resource_path(&server, location, "/about.html").unwrap();
        assert_eq!(path, "www/about.html");
    }

    #[test]
    fn appends_existing_index() {
        let site = Site::new().unwrap();
        site.write_file("index.html", "home").unwrap();
        site.create_dir("empty").unwrap();
        let server = given_server(&site.root(), &["/"]);
        let location = server.find_location("/");

        let path = resource_path(&server, location, "/").unwrap();
        assert_eq!(path, format!("{}index.html", site.root()));

        let path = resource_path(&server, location, "/empty/").unwrap();
        assert_eq!(path, format!("{}empty/", site.root()));
    }

    #[test]
    fn cgi_locations_skip_index() {
        let site = Site::new().unwrap();
        site.write_file("cgi-bin/index.html", "not a script").unwrap();
        let mut server = given_server(&site.root(), &["/cgi-bin"]);
        server.locations[0].root = Some(format!("{}cgi-bin", site.root()));
        server.locations[0].cgi = Some(webserv_config::CgiMapping {
            extension: ".sh".to_string(),
            interpreter: "/bin/sh".into(),
        });
        let location = server.find_location("/cgi-bin/");

        let path = resource_path(&server, location, "/cgi-bin/").unwrap();

        assert_eq!(path, format!("{}cgi-bin/", site.root()));
    }

    #[test]
    fn parent_segments_are_refused() {
        let server = given_server("www/", &["/"]);

        let result = resource_path(&server, None, "/../etc/passwd");
        assert_eq!(result, Err(ResourceError::Traversal));

        let result = resource_path(&server, None, "/a/%2e%2e/b");
        assert_eq!(result, Err(ResourceError::Traversal));

        assert!(resource_path(&server, None, "/a..b/c").is_ok());
    }

    #[test]
    fn decodes_before_mapping() {
        let server = given_server("www/", &["/"]);

        let path = resource_path(&server, server.find_location("/"), "/my%20file.txt").unwrap();

        assert_eq!(path, "www/my file.txt");
    }

    #[test]
    fn script_end_needs_boundary() {
        assert_eq!(script_end("/cgi-bin/test.py", ".py"), Some(16));
        assert_eq!(script_end("/cgi-bin/test.py/extra", ".py"), Some(16));
        assert_eq!(script_end("/cgi-bin/test.pyc", ".py"), None);
        assert_eq!(script_end("/a.pyc/b.py", ".py"), Some(11));
        assert_eq!(script_end("/cgi-bin/", ".py"), None);
    }
}
