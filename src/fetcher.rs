use std::path::{Path, PathBuf};

use chromiumoxide::Page;
use tracing::warn;

use crate::browser::{capture_failure, BrowserSession};
use crate::config::Config;
use crate::error::EkwError;
use crate::exporter::export_sections;
use crate::identifier::RecordIdentifier;
use crate::navigator::open_record;
use crate::section::SectionDocument;

/// Anything that can turn an identifier into its five section PDFs.
#[allow(async_fn_in_trait)]
pub trait RecordFetcher {
    async fn fetch(&mut self, id: &RecordIdentifier) -> Result<Vec<SectionDocument>, EkwError>;
}

/// Starts browser sessions.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    type Session: Session;

    async fn launch(&self) -> Result<Self::Session, EkwError>;
}

/// A running browser: hands out tabs and loads one record per tab.
#[allow(async_fn_in_trait)]
pub trait Session: Sized {
    type Tab;

    /// False once the browser has gone away underneath us.
    fn is_alive(&self) -> bool;
    async fn open_tab(&self) -> Result<Self::Tab, EkwError>;
    async fn load(&self, tab: &Self::Tab, id: &RecordIdentifier) -> Result<Vec<SectionDocument>, EkwError>;
    async fn capture_failure(&self, tab: &Self::Tab, dir: &Path, stem: &str);
    async fn close_tab(&self, tab: Self::Tab);
    async fn close(self);
}

/// Fetches records through a browser.
///
/// The browser is launched on first use and shared by later fetches; each
/// fetch gets its own tab, closed afterwards whatever the outcome. A session
/// whose connection has dropped is replaced before the next fetch.
pub struct BrowserFetcher<L: Launcher> {
    launcher: L,
    debug_dir: Option<PathBuf>,
    session: Option<L::Session>,
}

impl<'a> BrowserFetcher<ChromeLauncher<'a>> {
    pub fn new(config: &'a Config, headless: bool) -> Self {
        Self::with_launcher(ChromeLauncher { config, headless }, config.debug_dir.clone())
    }
}

impl<L: Launcher> BrowserFetcher<L> {
    pub fn with_launcher(launcher: L, debug_dir: Option<PathBuf>) -> Self {
        Self {
            launcher,
            debug_dir,
            session: None,
        }
    }

    /// Close the browser, if one was launched.
    pub async fn shutdown(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    async fn replace_dead_session(&mut self) {
        if self.session.as_ref().is_some_and(|s| !s.is_alive()) {
            warn!("browser connection lost, relaunching");
            if let Some(dead) = self.session.take() {
                dead.close().await;
            }
        }
    }
}

impl<L: Launcher> RecordFetcher for BrowserFetcher<L> {
    async fn fetch(&mut self, id: &RecordIdentifier) -> Result<Vec<SectionDocument>, EkwError> {
        self.replace_dead_session().await;
        if self.session.is_none() {
            self.session = Some(self.launcher.launch().await?);
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| EkwError::navigation("launch browser", "no session"))?;

        let tab = session.open_tab().await?;
        let result = session.load(&tab, id).await;
        if result.is_err() {
            if let Some(dir) = &self.debug_dir {
                session.capture_failure(&tab, dir, &id.file_stem()).await;
            }
        }
        session.close_tab(tab).await;
        result
    }
}

/// Launches Chromium with the stealth settings from [`Config`].
pub struct ChromeLauncher<'a> {
    config: &'a Config,
    headless: bool,
}

impl<'a> Launcher for ChromeLauncher<'a> {
    type Session = ChromeSession<'a>;

    async fn launch(&self) -> Result<ChromeSession<'a>, EkwError> {
        Ok(ChromeSession {
            browser: BrowserSession::launch(self.config, self.headless).await?,
            config: self.config,
        })
    }
}

pub struct ChromeSession<'a> {
    browser: BrowserSession,
    config: &'a Config,
}

impl Session for ChromeSession<'_> {
    type Tab = Page;

    fn is_alive(&self) -> bool {
        self.browser.is_alive()
    }

    async fn open_tab(&self) -> Result<Page, EkwError> {
        self.browser.new_page().await
    }

    async fn load(&self, tab: &Page, id: &RecordIdentifier) -> Result<Vec<SectionDocument>, EkwError> {
        open_record(tab, id, self.config).await?;
        export_sections(tab, self.config).await
    }

    async fn capture_failure(&self, tab: &Page, dir: &Path, stem: &str) {
        capture_failure(tab, dir, stem).await;
    }

    async fn close_tab(&self, tab: Page) {
        if let Err(e) = tab.close().await {
            warn!("closing tab: {}", e);
        }
    }

    async fn close(self) {
        self.browser.close().await;
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::merger::tests::sample_sections;

    const GOOD: &str = "KR1P/00012345/4";
    const MISSING: &str = "WA1M/00000001/1";

    type Journal = Rc<RefCell<Vec<String>>>;

    /// Records every lifecycle call; `alive` is shared with whichever
    /// session was launched last so tests can pull the plug on it.
    #[derive(Default)]
    struct FakeLauncher {
        journal: Journal,
        alive: Rc<Cell<bool>>,
        launches: Cell<u32>,
    }

    struct FakeSession {
        n: u32,
        journal: Journal,
        alive: Rc<Cell<bool>>,
        tabs: Cell<u32>,
    }

    impl Launcher for FakeLauncher {
        type Session = FakeSession;

        async fn launch(&self) -> Result<FakeSession, EkwError> {
            let n = self.launches.get() + 1;
            self.launches.set(n);
            self.alive.set(true);
            self.journal.borrow_mut().push(format!("launch {}", n));
            Ok(FakeSession {
                n,
                journal: Rc::clone(&self.journal),
                alive: Rc::clone(&self.alive),
                tabs: Cell::new(0),
            })
        }
    }

    impl FakeSession {
        fn log(&self, event: String) {
            self.journal.borrow_mut().push(event);
        }
    }

    impl Session for FakeSession {
        type Tab = u32;

        fn is_alive(&self) -> bool {
            self.alive.get()
        }

        async fn open_tab(&self) -> Result<u32, EkwError> {
            let tab = self.tabs.get() + 1;
            self.tabs.set(tab);
            self.log(format!("open tab {}.{}", self.n, tab));
            Ok(tab)
        }

        async fn load(&self, _tab: &u32, id: &RecordIdentifier) -> Result<Vec<SectionDocument>, EkwError> {
            if id.to_string() == MISSING {
                return Err(EkwError::RecordNotFound(id.to_string()));
            }
            Ok(sample_sections([1, 1, 1, 1, 1]))
        }

        async fn capture_failure(&self, tab: &u32, _dir: &Path, stem: &str) {
            self.log(format!("capture {}.{} {}", self.n, tab, stem));
        }

        async fn close_tab(&self, tab: u32) {
            self.log(format!("close tab {}.{}", self.n, tab));
        }

        async fn close(self) {
            self.log(format!("close session {}", self.n));
        }
    }

    fn id(raw: &str) -> RecordIdentifier {
        RecordIdentifier::parse(raw).unwrap()
    }

    fn events(journal: &Journal) -> Vec<String> {
        journal.borrow().clone()
    }

    #[tokio::test]
    async fn tab_closed_after_failed_fetch_and_session_reused() {
        let launcher = FakeLauncher::default();
        let journal = Rc::clone(&launcher.journal);
        let mut fetcher = BrowserFetcher::with_launcher(launcher, None);

        let err = fetcher.fetch(&id(MISSING)).await.unwrap_err();
        assert!(matches!(err, EkwError::RecordNotFound(_)));
        let sections = fetcher.fetch(&id(GOOD)).await.unwrap();
        assert_eq!(sections.len(), 5);

        assert_eq!(
            events(&journal),
            ["launch 1", "open tab 1.1", "close tab 1.1", "open tab 1.2", "close tab 1.2"]
        );
    }

    #[tokio::test]
    async fn dead_session_closed_and_relaunched() {
        let launcher = FakeLauncher::default();
        let journal = Rc::clone(&launcher.journal);
        let alive = Rc::clone(&launcher.alive);
        let mut fetcher = BrowserFetcher::with_launcher(launcher, None);

        fetcher.fetch(&id(GOOD)).await.unwrap();
        alive.set(false);
        fetcher.fetch(&id(GOOD)).await.unwrap();
        fetcher.shutdown().await;

        assert_eq!(
            events(&journal),
            [
                "launch 1",
                "open tab 1.1",
                "close tab 1.1",
                "close session 1",
                "launch 2",
                "open tab 2.1",
                "close tab 2.1",
                "close session 2",
            ]
        );
    }

    #[tokio::test]
    async fn failure_captured_only_with_debug_dir() {
        let launcher = FakeLauncher::default();
        let journal = Rc::clone(&launcher.journal);
        let mut fetcher = BrowserFetcher::with_launcher(launcher, Some(PathBuf::from("debug")));

        fetcher.fetch(&id(GOOD)).await.unwrap();
        fetcher.fetch(&id(MISSING)).await.unwrap_err();

        let log = events(&journal);
        let captures: Vec<&String> = log.iter().filter(|e| e.starts_with("capture")).collect();
        assert_eq!(captures, ["capture 1.2 WA1M_00000001_1"]);
        // Snapshot is taken before the tab goes away.
        assert_eq!(log.last().map(String::as_str), Some("close tab 1.2"));
    }

    #[tokio::test]
    async fn shutdown_without_fetch_launches_nothing() {
        let launcher = FakeLauncher::default();
        let journal = Rc::clone(&launcher.journal);
        let fetcher = BrowserFetcher::with_launcher(launcher, None);
        fetcher.shutdown().await;
        assert!(events(&journal).is_empty());
    }
}
