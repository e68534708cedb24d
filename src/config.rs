use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL: &str = "https://przegladarka-ekw.ms.gov.pl/";
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const WINDOW_SIZE: (u32, u32) = (1920, 1080);

pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(45);
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const SECTION_TIMEOUT: Duration = Duration::from_secs(20);
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub const ERROR_LOG: &str = "ekw_errors.log";
pub const ID_COLUMN: &str = "KW";

/// Bounds for every blocking wait in the navigation flow.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Anti-bot challenge until the search form shows up.
    pub challenge: Duration,
    /// Search results and the "current content" view.
    pub navigation: Duration,
    /// One section tab, from click until its page is ready.
    pub section: Duration,
    pub poll_interval: Duration,
    /// Extra pause after a page reports ready, for late scripts.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            challenge: CHALLENGE_TIMEOUT,
            navigation: NAVIGATION_TIMEOUT,
            section: SECTION_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            settle: SETTLE_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub user_agent: String,
    pub window_size: (u32, u32),
    /// Browser binary; `None` lets chromiumoxide locate one.
    pub chrome_executable: Option<PathBuf>,
    pub timeouts: Timeouts,
    /// Where failure screenshots and HTML dumps go, if anywhere.
    pub debug_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            window_size: WINDOW_SIZE,
            chrome_executable: None,
            timeouts: Timeouts::default(),
            debug_dir: None,
        }
    }
}

/// Parse a whole number of seconds from the command line.
pub fn parse_secs(s: &str) -> Result<Duration, String> {
    s.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("expected whole seconds, got '{}'", s))
}

// ── Tests ──
