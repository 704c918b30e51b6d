//! Where the user currently is, and how to send them to the login page

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Location the client reports to and redirects through
pub trait Navigator: Send + Sync {
    /// Whether the current page is the login page
    fn is_login_page(&self) -> bool;

    /// Leave the current page for the login page
    fn redirect_to_login(&self);

    /// Leave the login page after a successful login
    fn redirect_to_home(&self);
}

pub const HOME_PAGE: &str = "/";

/// Navigator tracking a current page path
///
/// Redirecting moves the navigator onto the login page, so a second
/// session-ending path in the same flow does not redirect again.
#[derive(Debug)]
pub struct PageNavigator {
    login_page: String,
    current: Mutex<String>,
    redirects: AtomicUsize,
}

impl PageNavigator {
    pub fn new(login_page: impl Into<String>, current: impl Into<String>) -> Self {
        Self {
            login_page: login_page.into(),
            current: Mutex::new(current.into()),
            redirects: AtomicUsize::new(0),
        }
    }

    /// Start on the login page
    pub fn at_login(login_page: impl Into<String>) -> Self {
        let login_page = login_page.into();
        Self::new(login_page.clone(), login_page)
    }

    pub fn login_page(&self) -> &str {
        &self.login_page
    }

    pub fn current_page(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn navigate(&self, page: impl Into<String>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = page.into();
    }

    /// Number of redirects to the login page so far
    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Default for PageNavigator {
    fn default() -> Self {
        Self::new(flowtest_core::config::DEFAULT_LOGIN_PAGE, HOME_PAGE)
    }
}

impl Navigator for PageNavigator {
    fn is_login_page(&self) -> bool {
        self.current_page() == self.login_page
    }

    fn redirect_to_login(&self) {
        warn!(from = %self.current_page(), to = %self.login_page, "Redirecting to login page");
        self.navigate(self.login_page.clone());
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }

    fn redirect_to_home(&self) {
        info!("Leaving login page");
        self.navigate(HOME_PAGE);
    }
}
