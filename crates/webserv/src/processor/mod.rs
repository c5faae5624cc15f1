//! Turning one framed request into one serialized response.

mod files;
mod resource;

use std::{
    path::Path,
    time::{Duration, Instant},
};

use tracing::{event, instrument, Level};
use webserv_cgi::{CgiInvocation, DEFAULT_CGI_TIMEOUT};
use webserv_config::{LocationConfig, Method, ServerConfig};
use webserv_http::{HttpRequest, HttpResponse};

use crate::{
    session::{SessionActivity, SessionStore, SESSION_COOKIE},
    RequestProcessor,
};

pub use self::{
    files::{mime_type, Upload},
    resource::{resource_path, script_end, url_decode, ResourceError},
};
use self::files::{Deletion, FileLookup};

/// Marker in a resource path that selects the session statistics endpoint.
pub const SESSION_STATS_PATH: &str = "/api/session-stats";

/// Serves static files, uploads, deletes and CGI scripts for the configured servers.
#[derive(Debug, Clone)]
pub struct SiteProcessor {
    cgi_timeout: Duration,
}

impl Default for SiteProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_CGI_TIMEOUT)
    }
}

impl RequestProcessor for SiteProcessor {
    fn process(
        &mut self,
        raw: &[u8],
        server: &ServerConfig,
        remote_addr: &str,
        sessions: &mut SessionStore,
    ) -> Vec<u8> {
        self.handle(raw, server, remote_addr, sessions).serialize()
    }
}

/// Process one raw request with default settings, returning the serialized response.
pub fn process_request(
    raw: &[u8],
    server: &ServerConfig,
    remote_addr: &str,
    sessions: &mut SessionStore,
) -> Vec<u8> {
    SiteProcessor::default().process(raw, server, remote_addr, sessions)
}

impl SiteProcessor {
    pub fn new(cgi_timeout: Duration) -> Self {
        Self { cgi_timeout }
    }

    /// Produce the response for one raw request.
    ///
    /// Never fails, every problem is answered with an error status instead.
    #[instrument("SiteProcessor::handle", skip_all, fields(remote_addr = remote_addr))]
    pub fn handle(
        &self,
        raw: &[u8],
        server: &ServerConfig,
        remote_addr: &str,
        sessions: &mut SessionStore,
    ) -> HttpResponse {
        let request = match HttpRequest::parse(raw, remote_addr) {
            Ok(request) => request,
            Err(error) => {
                event!(Level::DEBUG, %error, "rejecting malformed request");
                return error_response(400, server, None);
            }
        };

        let location = server.find_location(request.path());

        let mut cookies = Vec::new();
        let session_id = resolve_session(sessions, &request, &mut cookies);

        let mut response = self.route(&request, server, location, sessions, &session_id);
        for cookie in cookies {
            cookie.apply(&mut response);
        }

        event!(
            Level::DEBUG,
            method = request.method(),
            path = request.path(),
            status = response.status(),
            "handled request"
        );

        response
    }

    fn route(
        &self,
        request: &HttpRequest,
        server: &ServerConfig,
        location: Option<&LocationConfig>,
        sessions: &mut SessionStore,
        session_id: &str,
    ) -> HttpResponse {
        let allowed = server.allowed_methods_for(location);
        let method = request
            .method()
            .parse::<Method>()
            .ok()
            .filter(|method| allowed.contains(method));
        let Some(method) = method else {
            return error_response(405, server, location);
        };

        if request.body().len() as u64 > server.max_body_size_for(location) {
            return error_response(413, server, location);
        }

        if let Some(redirect) = location.and_then(|location| location.redirect.as_ref()) {
            return HttpResponse::redirect(redirect.code, &redirect.target);
        }

        let path = match resource_path(server, location, request.path()) {
            Ok(path) => path,
            Err(error) => {
                event!(Level::WARN, %error, path = request.path(), "refusing request path");
                return error_response(403, server, location);
            }
        };

        if let Some(cgi) = location.and_then(|location| location.cgi.as_ref()) {
            if let Some(end) = script_end(request.path(), &cgi.extension) {
                if !matches!(method, Method::Get | Method::Post) {
                    return error_response(405, server, location);
                }

                let path_info = &request.path()[end..];
                let script = match script_end(&path, &cgi.extension) {
                    Some(end) => &path[..end],
                    None => path.as_str(),
                };

                let invocation =
                    CgiInvocation::new(script, &cgi.interpreter, request, server, path_info);
                return match invocation.execute(self.cgi_timeout) {
                    Ok(output) => {
                        if let Some(activity) = activity_of(sessions, session_id) {
                            activity.cgi_runs.record(script);
                        }
                        output.into_response()
                    }
                    Err(error) => {
                        event!(Level::WARN, ?error, script, "cgi script failed");
                        error_response(error.status(), server, location)
                    }
                };
            }
        }

        match method {
            Method::Get => serve_get(server, location, &path, sessions, session_id),
            Method::Post => serve_upload(request, server, location, sessions, session_id),
            Method::Delete => serve_delete(server, location, &path, sessions, session_id),
        }
    }
}

fn serve_get(
    server: &ServerConfig,
    location: Option<&LocationConfig>,
    path: &str,
    sessions: &mut SessionStore,
    session_id: &str,
) -> HttpResponse {
    if let Some(activity) = activity_of(sessions, session_id) {
        activity.page_views.record(path);
    }

    if path.contains(SESSION_STATS_PATH) {
        let report = sessions
            .get(session_id)
            .map(|session| session.report())
            .unwrap_or_default();

        return match serde_json::to_string(&report) {
            Ok(json) => HttpResponse::ok(json, "application/json"),
            Err(error) => {
                event!(Level::ERROR, ?error, "failed to serialize session report");
                error_response(500, server, location)
            }
        };
    }

    match files::read_file(path) {
        FileLookup::File(response) => response,
        FileLookup::Directory => {
            if !location.is_some_and(|location| location.autoindex) {
                return error_response(403, server, location);
            }

            files::autoindex(path).unwrap_or_else(|error| {
                event!(Level::WARN, ?error, path, "failed to list directory");
                error_response(500, server, location)
            })
        }
        FileLookup::Missing => error_response(404, server, location),
        FileLookup::Unreadable => error_response(500, server, location),
    }
}

fn serve_upload(
    request: &HttpRequest,
    server: &ServerConfig,
    location: Option<&LocationConfig>,
    sessions: &mut SessionStore,
    session_id: &str,
) -> HttpResponse {
    let Some(store) = location.and_then(LocationConfig::upload_target) else {
        return error_response(400, server, location);
    };

    let upload = Upload::from_request(request);
    match files::store_upload(store, &upload) {
        Ok(target) => {
            event!(
                Level::DEBUG,
                target = %target.display(),
                bytes = upload.content.len(),
                "stored upload"
            );
            if let Some(activity) = activity_of(sessions, session_id) {
                activity.uploads.record(&upload.filename);
            }
            HttpResponse::with_status(201)
        }
        Err(error) => {
            event!(Level::WARN, ?error, store = %store.display(), "failed to store upload");
            error_response(500, server, location)
        }
    }
}

fn serve_delete(
    server: &ServerConfig,
    location: Option<&LocationConfig>,
    path: &str,
    sessions: &mut SessionStore,
    session_id: &str,
) -> HttpResponse {
    match files::delete_file(path) {
        Deletion::Deleted => {
            if let Some(activity) = activity_of(sessions, session_id) {
                activity.deletes.record(path);
            }
            HttpResponse::with_status(204)
        }
        Deletion::Missing => error_response(404, server, location),
        Deletion::Failed => error_response(500, server, location),
    }
}

/// Built-in response for `status`, with the body replaced by a configured error page if one
/// can be read.
///
/// Error page paths are resolved against the server root.
pub fn error_response(
    status: u16,
    server: &ServerConfig,
    location: Option<&LocationConfig>,
) -> HttpResponse {
    let mut response = HttpResponse::with_status(status);

    if let Some(page) = server.error_page_for(location, status) {
        let path = Path::new(&server.root).join(page.trim_start_matches('/'));

        match std::fs::read(&path) {
            Ok(body) => {
                response.set_body(body);
                response.set_header("Content-Type", "text/html");
            }
            Err(error) => {
                event!(Level::DEBUG, ?error, path = %path.display(), "error page unavailable");
            }
        }
    }

    response
}

fn activity_of<'a>(
    sessions: &'a mut SessionStore,
    session_id: &str,
) -> Option<&'a mut SessionActivity> {
    sessions.get_mut(session_id).map(|session| session.activity_mut())
}

/// Session cookie change to attach to the response.
enum SessionCookie {
    Issue { id: String, max_age: Duration },
    Expire,
}

impl SessionCookie {
    fn apply(self, response: &mut HttpResponse) {
        match self {
            SessionCookie::Issue { id, max_age } => {
                let max_age = i64::try_from(cookie_seconds(max_age)).unwrap_or(i64::MAX);
                response.set_cookie(SESSION_COOKIE, &id, max_age, "/");
            }
            SessionCookie::Expire => response.expire_cookie(SESSION_COOKIE),
        }
    }
}

/// Whole seconds for a `Max-Age` attribute, rounded up and never zero.
///
/// `Max-Age=0` tells the client to drop the cookie.
fn cookie_seconds(max_age: Duration) -> u64 {
    let seconds = max_age.as_secs() + u64::from(max_age.subsec_nanos() > 0);
    seconds.max(1)
}

/// Find the request's live session, or start a new one.
///
/// A session presented from a different client than the one it was bound to is destroyed and
/// replaced.
fn resolve_session(
    sessions: &mut SessionStore,
    request: &HttpRequest,
    cookies: &mut Vec<SessionCookie>,
) -> String {
    let now = Instant::now();
    let mut current = None;

    if let Some(id) = request.cookie(SESSION_COOKIE) {
        match sessions.get_mut(id) {
            Some(session) if !session.is_expired(now) => {
                session.touch();
                current = Some(id.to_string());
            }
            Some(_) => {
                event!(Level::DEBUG, session = id, "session expired");
                sessions.destroy(id);
            }
            None => {}
        }
    }

    let id = match current {
        Some(id) => id,
        None => issue_session(sessions, cookies),
    };

    let user_agent = request.header("User-Agent").unwrap_or_default();
    let verified = sessions
        .get_mut(&id)
        .map_or(true, |session| session.verify_client(request.remote_addr(), user_agent));
    if verified {
        return id;
    }

    event!(Level::WARN, session = %id, "session presented by a different client, replacing");
    sessions.destroy(&id);
    cookies.push(SessionCookie::Expire);

    let id = issue_session(sessions, cookies);
    if let Some(session) = sessions.get_mut(&id) {
        session.verify_client(request.remote_addr(), user_agent);
    }
    id
}

fn issue_session(sessions: &mut SessionStore, cookies: &mut Vec<SessionCookie>) -> String {
    let max_age = sessions.max_age();
    let id = sessions.create().id().to_string();

    cookies.push(SessionCookie::Issue {
        id: id.clone(),
        max_age,
    });
    id
}
