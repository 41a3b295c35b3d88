use rand::seq::SliceRandom;

/// Browser identities rotated across sessions
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Tracks the identity of one HTTP adapter's current session
///
/// The adapter owns exactly one of these. Every logical request is counted,
/// and once the rotation interval is reached the adapter replaces its
/// connection pool under a freshly drawn User-Agent.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Requests made since the session was created
    pub request_count: u32,

    /// Number of times the session has been replaced
    pub rotations: u32,

    /// User-Agent of the current session
    pub user_agent: &'static str,

    /// Proxy endpoint (`host:port`) the session is bound to, if any
    pub proxy: Option<String>,
}

impl SessionState {
    /// Creates a session with a random User-Agent and no proxy
    pub fn new() -> Self {
        Self {
            request_count: 0,
            rotations: 0,
            user_agent: pick_user_agent(),
            proxy: None,
        }
    }

    /// Counts one request; returns true when the session must be rotated
    pub fn record_request(&mut self, rotate_interval: u32) -> bool {
        self.request_count += 1;
        self.request_count >= rotate_interval
    }

    /// Resets the counter and draws a new User-Agent
    pub fn rotate(&mut self) {
        self.request_count = 0;
        self.rotations += 1;
        self.user_agent = pick_user_agent();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}
