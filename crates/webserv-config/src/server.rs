use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use crate::Method;

/// Largest accepted `client_max_body_size`, 2 GiB.
pub const MAX_BODY_SIZE_LIMIT: u64 = 2 << 30;

const DEFAULT_BODY_SIZE: u64 = 1024 * 1024;
const DEFAULT_INDEX: &str = "index.html";

/// Settings of one virtual server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: u16,
    pub host: Ipv4Addr,
    pub server_name: String,
    pub error_pages: BTreeMap<u16, String>,
    pub client_max_body_size: u64,
    /// Document root, always ending in `/`.
    pub root: String,
    pub index: String,
    pub allowed_methods: Vec<Method>,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: 80,
            host: Ipv4Addr::UNSPECIFIED,
            server_name: "localhost".to_string(),
            error_pages: BTreeMap::new(),
            client_max_body_size: DEFAULT_BODY_SIZE,
            root: "www/".to_string(),
            index: DEFAULT_INDEX.to_string(),
            allowed_methods: Method::ALL.to_vec(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Find the location with the longest path that is a prefix of `path`.
    ///
    /// A prefix only counts when it ends on a segment boundary of `path`, so `/upload` matches
    /// `/upload` and `/upload/file.txt` but not `/uploadx`. Ties keep the location declared
    /// first.
    pub fn find_location(&self, path: &str) -> Option<&LocationConfig> {
        let mut best: Option<&LocationConfig> = None;

        for location in &self.locations {
            if !location.matches(path) {
                continue;
            }

            let longer = best.map_or(true, |best| location.path.len() > best.path.len());
            if longer {
                best = Some(location);
            }
        }

        best
    }

    /// Methods allowed by the location, falling back to the server's.
    pub fn allowed_methods_for<'a>(&'a self, location: Option<&'a LocationConfig>) -> &'a [Method] {
        location
            .and_then(|location| location.allowed_methods.as_deref())
            .unwrap_or(&self.allowed_methods)
    }

    /// Body size limit of the location, falling back to the server's.
    pub fn max_body_size_for(&self, location: Option<&LocationConfig>) -> u64 {
        location
            .map(|location| location.client_max_body_size)
            .unwrap_or(self.client_max_body_size)
    }

    /// Error page path configured for `status`, location pages first.
    pub fn error_page_for<'a>(
        &'a self,
        location: Option<&'a LocationConfig>,
        status: u16,
    ) -> Option<&'a str> {
        location
            .and_then(|location| location.error_pages.get(&status))
            .or_else(|| self.error_pages.get(&status))
            .map(String::as_str)
    }

    /// Document root of the location, falling back to the server's.
    pub fn root_for<'a>(&'a self, location: Option<&'a LocationConfig>) -> &'a str {
        location
            .and_then(|location| location.root.as_deref())
            .unwrap_or(&self.root)
    }
}

/// Settings of one `location` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConfig {
    pub path: String,
    pub root: Option<String>,
    pub index: Option<String>,
    pub autoindex: bool,
    /// `None` when the location doesn't restrict methods itself.
    pub allowed_methods: Option<Vec<Method>>,
    pub redirect: Option<Redirect>,
    pub cgi: Option<CgiMapping>,
    pub upload_store: Option<PathBuf>,
    pub upload_enable: bool,
    pub client_max_body_size: u64,
    pub error_pages: BTreeMap<u16, String>,
}

impl LocationConfig {
    /// Create a location with default settings, inheriting the server's body size limit.
    pub fn new(path: impl Into<String>, client_max_body_size: u64) -> Self {
        Self {
            path: path.into(),
            root: None,
            index: None,
            autoindex: false,
            allowed_methods: None,
            redirect: None,
            cgi: None,
            upload_store: None,
            upload_enable: false,
            client_max_body_size,
            error_pages: BTreeMap::new(),
        }
    }

    /// Check if this location's path is a prefix of `path`, ending on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(self.path.as_str()) else {
            return false;
        };

        self.path.ends_with('/') || rest.is_empty() || rest.starts_with('/')
    }

    /// Upload store, if uploads are switched on for this location.
    pub fn upload_target(&self) -> Option<&Path> {
        if !self.upload_enable {
            return None;
        }

        self.upload_store.as_deref()
    }
}

/// Target of a `return` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub code: u16,
    /// Empty when only a code was given.
    pub target: String,
}

/// Script extension handled by an interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiMapping {
    /// Extension including its leading dot.
    pub extension: String,
    pub interpreter: PathBuf,
}
