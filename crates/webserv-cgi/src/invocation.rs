use std::{
    collections::BTreeMap,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use tracing::{event, instrument, Level};
use webserv_config::ServerConfig;
use webserv_http::HttpRequest;

use crate::{CgiError, CgiOutput, CgiTask};

/// Everything needed to run one CGI script for one request.
#[derive(Debug, Clone)]
pub struct CgiInvocation {
    script_path: PathBuf,
    interpreter: PathBuf,
    path_info: String,

    method: String,
    request_uri: String,
    query_string: String,
    remote_addr: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,

    server_name: String,
    server_port: u16,
}

impl CgiInvocation {
    pub fn new(
        script_path: impl Into<PathBuf>,
        interpreter: impl Into<PathBuf>,
        request: &HttpRequest,
        server: &ServerConfig,
        path_info: impl Into<String>,
    ) -> Self {
        Self {
            script_path: script_path.into(),
            interpreter: interpreter.into(),
            path_info: path_info.into(),

            method: request.method().to_string(),
            request_uri: request.path().to_string(),
            query_string: request.query_string().to_string(),
            remote_addr: request.remote_addr().to_string(),
            headers: request.headers().clone(),
            body: request.body().to_vec(),

            server_name: server.server_name.clone(),
            server_port: server.listen,
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// CGI meta-variables, in the order they're passed to the script.
    ///
    /// Fixed variables come first, followed by one `HTTP_` variable per request header, its
    /// name upper-cased with `-` replaced by `_`.
    pub fn environment(&self) -> Vec<(String, String)> {
        let script = self.script_path.display().to_string();
        let header = |name: &str| {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };

        let mut environment = vec![
            ("REQUEST_METHOD".to_string(), self.method.clone()),
            ("SCRIPT_FILENAME".to_string(), script.clone()),
            ("SCRIPT_NAME".to_string(), script),
            ("PATH_INFO".to_string(), self.path_info.clone()),
            ("REQUEST_URI".to_string(), self.request_uri.clone()),
            ("QUERY_STRING".to_string(), self.query_string.clone()),
            ("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string()),
            ("CONTENT_LENGTH".to_string(), header("Content-Length")),
            ("CONTENT_TYPE".to_string(), header("Content-Type")),
            ("REMOTE_ADDR".to_string(), self.remote_addr.clone()),
            ("HTTP_HOST".to_string(), header("Host")),
            ("SERVER_NAME".to_string(), self.server_name.clone()),
            ("SERVER_PORT".to_string(), self.server_port.to_string()),
        ];

        for (key, value) in &self.headers {
            if key.is_empty() {
                continue;
            }

            let name = format!("HTTP_{}", key.to_ascii_uppercase().replace('-', "_"));
            environment.push((name, value.clone()));
        }

        environment
    }

    /// Start the script as a subprocess.
    ///
    /// The script is executed from its own directory, with `argv[0]` set to its file name and
    /// the interpreter path as its only argument. A POST body is fed to its stdin as the task is
    /// polled, and the timeout counts from just before the spawn.
    #[instrument("CgiInvocation::spawn", skip_all, fields(script = %self.script_path.display()))]
    pub fn spawn(&self, timeout: Duration) -> Result<CgiTask, CgiError> {
        let spawn_error = |source| CgiError::Spawn {
            script: self.script_path.clone(),
            source,
        };

        let script = self.script_path.canonicalize().map_err(spawn_error)?;
        let directory = script.parent().unwrap_or(Path::new("/")).to_path_buf();
        let name = script.file_name().unwrap_or(script.as_os_str()).to_os_string();

        let started = Instant::now();
        let child = Command::new(&script)
            .arg0(name)
            .arg(&self.interpreter)
            .current_dir(directory)
            .env_clear()
            .envs(self.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        event!(Level::DEBUG, pid = child.id(), "cgi script started");

        let input = if self.method == "POST" {
            self.body.clone()
        } else {
            Vec::new()
        };
        CgiTask::new(child, input, started, timeout)
    }

    /// Run the script to completion, stalling the caller until it finishes or times out.
    pub fn execute(&self, timeout: Duration) -> Result<CgiOutput, CgiError> {
        self.spawn(timeout)?.wait()
    }
}
