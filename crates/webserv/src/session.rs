use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{event, Level};
use uuid::Uuid;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "WEBSERV_SESSION";

/// Default idle lifetime of a session, also sent as the cookie's `Max-Age`.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(3600);

const DISPLAY_LIMIT: usize = 50;

/// Server-side state of one browser session.
#[derive(Debug)]
pub struct Session {
    id: String,
    created: Instant,
    last_accessed: Instant,
    max_age: Duration,
    client: Option<ClientIdentity>,
    activity: SessionActivity,
}

/// Address and user agent a session was first used from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub addr: String,
    pub user_agent: String,
}

impl Session {
    fn new(id: String, max_age: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            created: now,
            last_accessed: now,
            max_age,
            client: None,
            activity: SessionActivity::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    /// Check if the session has been idle longer than its max age.
    ///
    /// A zero max age never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        if self.max_age.is_zero() {
            return false;
        }

        now.saturating_duration_since(self.last_accessed) > self.max_age
    }

    pub fn client(&self) -> Option<&ClientIdentity> {
        self.client.as_ref()
    }

    /// Bind the session to a client on first use, and check the client on every use after.
    ///
    /// A different address always fails. A different user agent only fails when one was
    /// recorded.
    pub fn verify_client(&mut self, addr: &str, user_agent: &str) -> bool {
        let Some(client) = &self.client else {
            self.client = Some(ClientIdentity {
                addr: addr.to_string(),
                user_agent: user_agent.to_string(),
            });
            return true;
        };

        if client.addr != addr {
            return false;
        }

        client.user_agent.is_empty() || client.user_agent == user_agent
    }

    pub fn activity(&self) -> &SessionActivity {
        &self.activity
    }

    pub fn activity_mut(&mut self) -> &mut SessionActivity {
        &mut self.activity
    }

    pub fn report(&self) -> SessionReport {
        self.activity.report()
    }
}

/// Per-session counters, each with the most recent target and time.
#[derive(Debug, Default, Clone)]
pub struct SessionActivity {
    pub page_views: Activity,
    pub uploads: Activity,
    pub deletes: Activity,
    pub cgi_runs: Activity,
}

#[derive(Debug, Default, Clone)]
pub struct Activity {
    pub count: u64,
    pub last_target: Option<String>,
    pub last_time: Option<DateTime<Local>>,
}

impl Activity {
    pub fn record(&mut self, target: &str) {
        self.count += 1;
        self.last_target = Some(target.to_string());
        self.last_time = Some(Local::now());
    }

    fn time_display(&self) -> String {
        match &self.last_time {
            Some(time) => time.format("%H:%M:%S").to_string(),
            None => "never".to_string(),
        }
    }

    fn target_display(&self) -> String {
        match &self.last_target {
            Some(target) => display_name(target),
            None => "-".to_string(),
        }
    }
}

impl SessionActivity {
    pub fn report(&self) -> SessionReport {
        SessionReport {
            page_views: self.page_views.count,
            upload_count: self.uploads.count,
            delete_count: self.deletes.count,
            cgi_count: self.cgi_runs.count,
            last_page_view: self.page_views.time_display(),
            last_upload: self.uploads.time_display(),
            last_delete: self.deletes.time_display(),
            last_cgi: self.cgi_runs.time_display(),
            last_page_name: self.page_views.target_display(),
            last_upload_file: self.uploads.target_display(),
            last_delete_file: self.deletes.target_display(),
            last_cgi_script: self.cgi_runs.target_display(),
        }
    }
}

/// Session statistics, as served to the browser.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub page_views: u64,
    pub upload_count: u64,
    pub delete_count: u64,
    pub cgi_count: u64,
    pub last_page_view: String,
    pub last_upload: String,
    pub last_delete: String,
    pub last_cgi: String,
    pub last_page_name: String,
    pub last_upload_file: String,
    pub last_delete_file: String,
    pub last_cgi_script: String,
}

impl Default for SessionReport {
    fn default() -> Self {
        SessionActivity::default().report()
    }
}

/// Reduce a path to its file name, cutting long names short.
fn display_name(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = if name.is_empty() { path } else { name };

    if name.is_empty() {
        return "-".to_string();
    }

    if name.chars().count() > DISPLAY_LIMIT {
        let mut short: String = name.chars().take(DISPLAY_LIMIT - 1).collect();
        short.push_str("...");
        return short;
    }

    name.to_string()
}

/// All live sessions, keyed by id.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    max_age: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_MAX_AGE)
    }
}

impl SessionStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            max_age,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Start a new session with a fresh, unguessable id.
    pub fn create(&mut self) -> &mut Session {
        let id = format!("sess_{}", Uuid::new_v4().simple());
        event!(Level::DEBUG, session = %id, "session created");

        let max_age = self.max_age;
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id, max_age))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Remove a session, returning if it existed.
    pub fn destroy(&mut self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            event!(Level::DEBUG, session = %id, "session destroyed");
        }
        removed
    }

    /// Remove every expired session, returning how many were removed.
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));

        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
