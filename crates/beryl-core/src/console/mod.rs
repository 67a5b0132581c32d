//! Console hand-off.
//!
//! The last step of a successful install opens the exploration console in
//! the user's browser. The launch itself is fire-and-forget; only a spawn
//! failure is reported.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Errors launching the console.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The platform opener could not be spawned.
    #[error("failed to launch {program} for {url}")]
    Spawn {
        /// Opener program.
        program: String,
        /// Console URL.
        url: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Opens the console UI at a URL.
#[async_trait]
pub trait ConsoleLauncher: Send + Sync {
    /// Opens `url`, detached from the calling process.
    async fn open(&self, url: &str) -> Result<(), ConsoleError>;
}

/// Launcher using the platform URL opener.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserLauncher;

impl BrowserLauncher {
    fn opener() -> (&'static str, &'static [&'static str]) {
        if cfg!(target_os = "macos") {
            ("open", &[])
        } else if cfg!(target_os = "windows") {
            ("cmd", &["/C", "start"])
        } else {
            ("xdg-open", &[])
        }
    }
}

#[async_trait]
impl ConsoleLauncher for BrowserLauncher {
    async fn open(&self, url: &str) -> Result<(), ConsoleError> {
        let (program, prefix_args) = Self::opener();
        info!(url, "opening console");
        tokio::process::Command::new(program)
            .args(prefix_args)
            .arg(url)
            .spawn()
            .map_err(|source| ConsoleError::Spawn {
                program: program.to_string(),
                url: url.to_string(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opener_is_platform_appropriate() {
        let (program, _) = BrowserLauncher::opener();
        assert!(["open", "cmd", "xdg-open"].contains(&program));
    }
}
