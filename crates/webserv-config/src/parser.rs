use std::{
    collections::HashSet,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use tracing::{event, instrument, Level};

use crate::{
    CgiMapping, ConfigError, LocationConfig, Method, Redirect, ServerConfig, MAX_BODY_SIZE_LIMIT,
};

const INVALID_PATH_CHARS: &[char] = &['*', '?', '|', '<', '>', '"'];

/// Read and parse a configuration file.
#[instrument("config::parse_file", skip_all, fields(path = %path.as_ref().display()))]
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>, ConfigError> {
    let path = path.as_ref();
    let filename = path.display().to_string();

    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Open {
        path: filename.clone(),
        source,
    })?;

    let servers = parse_str(&source, &filename)?;
    event!(Level::DEBUG, count = servers.len(), "configuration loaded");

    Ok(servers)
}

/// Parse configuration source, `filename` is only used for error messages.
pub fn parse_str(source: &str, filename: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let mut parser = Parser {
        filename,
        lines: source.lines(),
        line: 0,
    };

    let mut servers = Vec::new();
    while let Some(line) = parser.next_line() {
        if line == "server {" {
            let server = parser.parse_server()?;
            servers.push(server);
            continue;
        }

        let directive = line.split_whitespace().next().unwrap_or_default();
        return Err(parser.error_not_allowed(directive));
    }

    validate(&servers, filename)?;

    Ok(servers)
}

fn validate(servers: &[ServerConfig], filename: &str) -> Result<(), ConfigError> {
    if servers.is_empty() {
        return Err(ConfigError::NoServer {
            file: filename.to_string(),
        });
    }

    let mut ports = HashSet::new();
    for server in servers {
        if !ports.insert(server.listen) {
            return Err(ConfigError::DuplicateListen {
                port: server.listen,
                file: filename.to_string(),
            });
        }
    }

    Ok(())
}

struct Parser<'a> {
    filename: &'a str,
    lines: std::str::Lines<'a>,
    line: usize,
}

impl<'a> Parser<'a> {
    /// Next line with content, comments stripped and whitespace trimmed.
    fn next_line(&mut self) -> Option<&'a str> {
        for line in self.lines.by_ref() {
            self.line += 1;

            let line = match line.find('#') {
                Some(position) => &line[..position],
                None => line,
            };
            let line = line.trim();

            if !line.is_empty() {
                return Some(line);
            }
        }

        None
    }

    fn parse_server(&mut self) -> Result<ServerConfig, ConfigError> {
        let mut server = ServerConfig::default();

        while let Some(line) = self.next_line() {
            if line == "}" {
                event!(
                    Level::DEBUG,
                    listen = server.listen,
                    locations = server.locations.len(),
                    "server block parsed"
                );
                return Ok(server);
            }

            if line.starts_with("location") && line.contains('{') {
                self.parse_location(line, &mut server)?;
                continue;
            }

            let tokens = self.directive_tokens(line)?;
            self.apply_server_directive(&mut server, &tokens)?;
        }

        Err(self.error_eof())
    }

    fn apply_server_directive(
        &self,
        server: &mut ServerConfig,
        tokens: &[&'a str],
    ) -> Result<(), ConfigError> {
        let directive = tokens[0];

        match directive {
            "listen" => {
                let value = self.single_value(tokens)?;
                server.listen = value
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port > 0)
                    .ok_or_else(|| self.error_value(directive, value))?;
            }
            "host" => {
                let value = self.single_value(tokens)?;
                server.host = parse_host(value).ok_or_else(|| self.error_value(directive, value))?;
            }
            "server_name" => {
                let value = self.single_value(tokens)?;
                let valid = value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '*' | '_'));
                if !valid {
                    return Err(self.error_value(directive, value));
                }
                server.server_name = value.to_string();
            }
            "error_page" => {
                let (code, page) = self.error_page(tokens)?;
                server.error_pages.insert(code, page);
            }
            "client_max_body_size" => {
                server.client_max_body_size = self.body_size(tokens)?;
            }
            "root" => {
                let mut root = self.path_value(tokens)?;
                if !root.ends_with('/') {
                    root.push('/');
                }
                server.root = root;
            }
            "index" => {
                server.index = self.path_value(tokens)?;
            }
            _ => return Err(self.error_unknown(directive)),
        }

        Ok(())
    }

    fn parse_location(&mut self, line: &str, server: &mut ServerConfig) -> Result<(), ConfigError> {
        let tokens: Vec<_> = line.split_whitespace().collect();
        if tokens.len() != 3 || tokens[2] != "{" {
            return Err(self.error_directive("location"));
        }

        let path = tokens[1];
        if !path.starts_with('/') || !is_safe_path(path) {
            return Err(self.error_value("location", path));
        }

        // Locations inherit the body size limit in effect where the block starts
        let mut location = LocationConfig::new(path, server.client_max_body_size);
        let mut cgi_extension = None;
        let mut cgi_path = None;

        while let Some(line) = self.next_line() {
            if line == "}" {
                location.cgi = match (cgi_extension, cgi_path) {
                    (None, None) => None,
                    (Some(extension), Some(interpreter)) => Some(CgiMapping {
                        extension,
                        interpreter,
                    }),
                    _ => return Err(self.error_value("cgi", "path/extension")),
                };

                if server.locations.iter().any(|other| other.path == location.path) {
                    event!(Level::WARN, path = %location.path, "duplicate location ignored");
                } else {
                    server.locations.push(location);
                }

                return Ok(());
            }

            let tokens = self.directive_tokens(line)?;
            let directive = tokens[0];

            match directive {
                "root" => location.root = Some(self.path_value(&tokens)?),
                "index" => location.index = Some(self.path_value(&tokens)?),
                "autoindex" => location.autoindex = self.switch(&tokens)?,
                "allowed_methods" => location.allowed_methods = Some(self.methods(&tokens)?),
                "return" => location.redirect = Some(self.redirect(&tokens)?),
                "cgi_extension" => {
                    let value = self.single_value(&tokens)?;
                    if !is_valid_extension(value) {
                        return Err(self.error_value(directive, value));
                    }
                    cgi_extension = Some(value.to_string());
                }
                "cgi_path" => {
                    let value = self.path_value(&tokens)?;
                    if !Path::new(&value).exists() {
                        return Err(self.error_value(directive, &value));
                    }
                    cgi_path = Some(PathBuf::from(value));
                }
                "upload_store" => {
                    location.upload_store = Some(PathBuf::from(self.path_value(&tokens)?));
                }
                "upload_enable" => location.upload_enable = self.switch(&tokens)?,
                "client_max_body_size" => location.client_max_body_size = self.body_size(&tokens)?,
                "error_page" => {
                    let (code, page) = self.error_page(&tokens)?;
                    location.error_pages.insert(code, page);
                }
                _ => return Err(self.error_unknown(directive)),
            }
        }

        Err(self.error_eof())
    }

    /// Split a directive line into tokens, requiring and stripping the terminating `;`.
    fn directive_tokens(&self, line: &'a str) -> Result<Vec<&'a str>, ConfigError> {
        let mut tokens: Vec<_> = line.split_whitespace().collect();
        let directive = tokens[0];

        let Some(last) = tokens.last_mut() else {
            return Err(self.error_directive(directive));
        };
        let Some(stripped) = last.strip_suffix(';') else {
            return Err(ConfigError::NotTerminated {
                directive: directive.to_string(),
                file: self.filename.to_string(),
                line: self.line,
            });
        };

        *last = stripped;
        if stripped.is_empty() {
            tokens.pop();
        }

        if tokens.is_empty() {
            return Err(self.error_directive(directive));
        }

        Ok(tokens)
    }

    fn arguments<'t>(
        &self,
        tokens: &'t [&'a str],
        min: usize,
        max: usize,
    ) -> Result<&'t [&'a str], ConfigError> {
        let count = tokens.len() - 1;
        if count < min || count > max {
            return Err(self.error_directive(tokens[0]));
        }

        Ok(&tokens[1..])
    }

    fn single_value(&self, tokens: &[&'a str]) -> Result<&'a str, ConfigError> {
        let arguments = self.arguments(tokens, 1, 1)?;
        Ok(arguments[0])
    }

    fn path_value(&self, tokens: &[&'a str]) -> Result<String, ConfigError> {
        let value = self.single_value(tokens)?;
        if !is_safe_path(value) {
            return Err(self.error_value(tokens[0], value));
        }

        Ok(value.to_string())
    }

    fn switch(&self, tokens: &[&'a str]) -> Result<bool, ConfigError> {
        match self.single_value(tokens)? {
            "on" => Ok(true),
            "off" => Ok(false),
            value => Err(self.error_value(tokens[0], value)),
        }
    }

    fn body_size(&self, tokens: &[&'a str]) -> Result<u64, ConfigError> {
        let value = self.single_value(tokens)?;
        parse_body_size(value).ok_or_else(|| self.error_value(tokens[0], value))
    }

    fn error_page(&self, tokens: &[&'a str]) -> Result<(u16, String), ConfigError> {
        let arguments = self.arguments(tokens, 2, 2)?;

        let code = arguments[0]
            .parse::<u16>()
            .ok()
            .filter(|code| (400..=599).contains(code))
            .ok_or_else(|| self.error_value(tokens[0], arguments[0]))?;

        let page = arguments[1];
        if !is_safe_path(page) {
            return Err(self.error_value(tokens[0], page));
        }

        Ok((code, page.to_string()))
    }

    fn methods(&self, tokens: &[&'a str]) -> Result<Vec<Method>, ConfigError> {
        let arguments = self.arguments(tokens, 1, 3)?;

        let mut methods = Vec::new();
        for argument in arguments {
            let method = argument
                .parse::<Method>()
                .map_err(|_| self.error_value(tokens[0], argument))?;
            methods.push(method);
        }

        Ok(methods)
    }

    /// `return [code] [target];`, where a lone argument is a code if it's numeric.
    fn redirect(&self, tokens: &[&'a str]) -> Result<Redirect, ConfigError> {
        let arguments = self.arguments(tokens, 1, 2)?;

        let (code, target) = match arguments {
            [single] if single.bytes().all(|byte| byte.is_ascii_digit()) => (Some(*single), ""),
            [single] => (None, *single),
            [code, target] => (Some(*code), *target),
            _ => return Err(self.error_directive(tokens[0])),
        };

        let code = match code {
            Some(raw) => raw
                .parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| self.error_value(tokens[0], raw))?,
            None => 302,
        };

        let valid_target = target.starts_with('/') || target.starts_with("http");
        if !target.is_empty() && (!valid_target || !is_safe_path(target)) {
            return Err(self.error_value(tokens[0], target));
        }

        Ok(Redirect {
            code,
            target: target.to_string(),
        })
    }

    fn error_eof(&self) -> ConfigError {
        ConfigError::UnexpectedEof {
            file: self.filename.to_string(),
            line: self.line,
        }
    }

    fn error_unknown(&self, directive: &str) -> ConfigError {
        ConfigError::UnknownDirective {
            directive: directive.to_string(),
            file: self.filename.to_string(),
            line: self.line,
        }
    }

    fn error_not_allowed(&self, directive: &str) -> ConfigError {
        ConfigError::NotAllowedHere {
            directive: directive.to_string(),
            file: self.filename.to_string(),
            line: self.line,
        }
    }

    fn error_directive(&self, directive: &str) -> ConfigError {
        ConfigError::InvalidDirective {
            directive: directive.to_string(),
            file: self.filename.to_string(),
            line: self.line,
        }
    }

    fn error_value(&self, directive: &str, value: &str) -> ConfigError {
        ConfigError::InvalidValue {
            value: value.to_string(),
            directive: directive.to_string(),
            file: self.filename.to_string(),
            line: self.line,
        }
    }
}

/// Dotted quad, each part one to three digits of at most 255.
fn parse_host(value: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut count = 0;

    for part in value.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }

        let octet = part.parse::<u8>().ok()?;
        *octets.get_mut(count)? = octet;
        count += 1;
    }

    if count != 4 {
        return None;
    }

    Some(Ipv4Addr::from(octets))
}

/// Number with an optional `K`, `M` or `G` suffix, between one byte and 2 GiB.
fn parse_body_size(value: &str) -> Option<u64> {
    let (number, multiplier) = match value.chars().last()? {
        'K' | 'k' => (&value[..value.len() - 1], 1024),
        'M' | 'm' => (&value[..value.len() - 1], 1024 * 1024),
        'G' | 'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };

    let size = number.parse::<u64>().ok()?.checked_mul(multiplier)?;
    if size == 0 || size > MAX_BODY_SIZE_LIMIT {
        return None;
    }

    Some(size)
}

fn is_safe_path(value: &str) -> bool {
    !value.contains("..") && !value.contains(INVALID_PATH_CHARS)
}

fn is_valid_extension(value: &str) -> bool {
    let Some(name) = value.strip_prefix('.') else {
        return false;
    };

    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_must_be_dotted_quad() {
        assert_eq!(parse_host("127.0.0.1"), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(parse_host("0.0.0.0"), Some(Ipv4Addr::UNSPECIFIED));
        assert_eq!(parse_host("256.0.0.1"), None);
        assert_eq!(parse_host("1.2.3"), None);
        assert_eq!(parse_host("1.2.3.4.5"), None);
        assert_eq!(parse_host("1..2.3"), None);
        assert_eq!(parse_host("localhost"), None);
    }

    #[test]
    fn body_size_suffixes() {
        assert_eq!(parse_body_size("10"), Some(10));
        assert_eq!(parse_body_size("8K"), Some(8 * 1024));
        assert_eq!(parse_body_size("2m"), Some(2 * 1024 * 1024));
        assert_eq!(parse_body_size("2G"), Some(MAX_BODY_SIZE_LIMIT));
        assert_eq!(parse_body_size("3G"), None);
        assert_eq!(parse_body_size("0"), None);
        assert_eq!(parse_body_size("M"), None);
        assert_eq!(parse_body_size("-1"), None);
    }

    #[test]
    fn extensions_need_leading_dot() {
        assert!(is_valid_extension(".py"));
        assert!(is_valid_extension(".cgi-bin_2"));
        assert!(!is_valid_extension("py"));
        assert!(!is_valid_extension("."));
        assert!(!is_valid_extension(".p/y"));
    }

    #[test]
    fn unsafe_paths() {
        assert!(is_safe_path("www/site/"));
        assert!(!is_safe_path("../etc"));
        assert!(!is_safe_path("www/*.html"));
    }
}
