//! Opening URLs in the operator's browser.

use std::io;

pub trait BrowserOpener: Send + Sync {
    /// Opens `url`, in `browser` when named.
    fn open(&self, url: &str, browser: Option<&str>) -> io::Result<()>;
}

/// The platform's URL handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str, browser: Option<&str>) -> io::Result<()> {
        match browser {
            Some(app) if !app.is_empty() => open::with(url, app),
            _ => open::that(url),
        }
    }
}
