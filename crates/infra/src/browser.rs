//! Opening the authorization URL in the user's browser

use std::process::{Command, Stdio};

use credcache_domain::{CredCacheError, Result};
use tracing::debug;

/// Hands a URL to something that can show it to the user.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the platform's URL handler (`open`, `xdg-open` or `start`), or
/// a configured program instead.
#[derive(Debug, Clone, Default)]
pub struct CommandBrowserOpener {
    program: Option<String>,
}

impl CommandBrowserOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `program <url>` instead of the platform default.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: Some(program.into()) }
    }

    fn command(&self, url: &str) -> Command {
        if let Some(program) = &self.program {
            let mut command = Command::new(program);
            command.arg(url);
            return command;
        }
        platform_command(url)
    }
}

#[cfg(target_os = "macos")]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("open");
    command.arg(url);
    command
}

#[cfg(target_os = "windows")]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("cmd");
    // The empty argument is the window title `start` expects first.
    command.args(["/C", "start", ""]).arg(url);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_command(url: &str) -> Command {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    command
}

impl BrowserOpener for CommandBrowserOpener {
    fn open(&self, url: &str) -> Result<()> {
        let mut command = self.command(url);
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let child = command.spawn().map_err(|err| {
            CredCacheError::Internal(format!("failed to launch browser: {err}"))
        })?;
        debug!(pid = child.id(), "browser launched");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn configured_program_receives_the_url() {
        let opener = CommandBrowserOpener::with_program("true");
        assert!(opener.open("https://login.microsoftonline.com/").is_ok());

        let command = opener.command("https://example.test/");
        assert_eq!(command.get_program(), "true");
        assert_eq!(command.get_args().collect::<Vec<_>>(), vec!["https://example.test/"]);
    }

    #[test]
    fn missing_program_is_an_error() {
        let opener = CommandBrowserOpener::with_program("/nonexistent/browser");
        assert!(matches!(opener.open("https://example.test/"), Err(CredCacheError::Internal(_))));
    }
}
