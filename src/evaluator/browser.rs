//! Managed headless Chromium lifecycle
//!
//! Launch order: an explicitly configured executable, then well-known
//! environment variables and install locations, then a managed download
//! into the user cache directory. Each launch gets a throwaway profile
//! directory which is removed again on close.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;

use crate::errors::EvaluateError;

/// Browser launch tuning for [`ChromiumEvaluator`](super::ChromiumEvaluator).
#[derive(Debug, Clone)]
pub struct BrowserLaunchConfig {
    /// Explicit chromium binary, skipping detection.
    pub chrome_executable: Option<PathBuf>,
    /// Timeout for individual CDP requests.
    pub request_timeout: Duration,
    /// Chromium sandboxing breaks in most container setups.
    pub no_sandbox: bool,
    /// Additional command line arguments.
    pub extra_args: Vec<String>,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            request_timeout: Duration::from_secs(30),
            no_sandbox: true,
            extra_args: Vec::new(),
        }
    }
}

const DEFAULT_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--no-first-run",
    "--mute-audio",
    "--hide-scrollbars",
];

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A launched browser plus its event handler task and profile directory.
pub(crate) struct BrowserHandle {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    profile_dir: Option<PathBuf>,
}

impl BrowserHandle {
    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser process and clean up. Must run before the runtime
    /// shuts down; `Drop` only covers the handler task and profile dir.
    pub(crate) async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            log::debug!("failed to close browser: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            log::debug!("browser did not exit cleanly: {e}");
        }
        self.handler_task.abort();
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::debug!("failed to remove profile dir {}: {e}", dir.display());
            }
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler_task.abort();
        if let Some(dir) = self.profile_dir.take() {
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}

pub(crate) async fn launch(config: &BrowserLaunchConfig) -> Result<BrowserHandle, EvaluateError> {
    let executable = match &config.chrome_executable {
        Some(path) => path.clone(),
        None => match detect_executable() {
            Some(path) => path,
            None => download_managed_browser().await?,
        },
    };

    let profile_dir = std::env::temp_dir().join(format!(
        "critical-css-profile-{}-{}",
        std::process::id(),
        PROFILE_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&profile_dir).map_err(|e| {
        EvaluateError::Launch(format!(
            "failed to create profile dir {}: {e}",
            profile_dir.display()
        ))
    })?;

    let mut builder = BrowserConfig::builder()
        .chrome_executable(&executable)
        .user_data_dir(&profile_dir)
        .request_timeout(config.request_timeout)
        .window_size(1366, 768)
        .headless_mode(HeadlessMode::default());
    for arg in DEFAULT_ARGS {
        builder = builder.arg(*arg);
    }
    if config.no_sandbox {
        builder = builder.no_sandbox();
    }
    for arg in &config.extra_args {
        builder = builder.arg(arg);
    }

    let browser_config = builder.build().map_err(EvaluateError::Launch)?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| EvaluateError::Launch(format!("failed to launch chromium: {e}")))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                log::trace!("browser handler: {e}");
            }
        }
    });

    log::debug!("chromium launched from {}", executable.display());

    Ok(BrowserHandle {
        browser,
        handler_task,
        profile_dir: Some(profile_dir),
    })
}

fn detect_executable() -> Option<PathBuf> {
    for var in ["CHROME", "CHROMIUM", "CHROME_PATH"] {
        if let Ok(value) = std::env::var(var) {
            let path = PathBuf::from(value);
            if path.exists() {
                return Some(path);
            }
        }
    }

    const CANDIDATES: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists())
}

async fn download_managed_browser() -> Result<PathBuf, EvaluateError> {
    let cache_dir = dirs::cache_dir()
        .map(|dir| dir.join("critical-css").join("chromium"))
        .unwrap_or_else(|| std::env::temp_dir().join("critical-css-chromium"));
    tokio::fs::create_dir_all(&cache_dir).await.map_err(|e| {
        EvaluateError::Launch(format!(
            "failed to create browser cache dir {}: {e}",
            cache_dir.display()
        ))
    })?;

    log::info!(
        "no system chromium found, downloading a managed build to {}",
        cache_dir.display()
    );

    let options = BrowserFetcherOptions::builder()
        .with_path(&cache_dir)
        .build()
        .map_err(|e| EvaluateError::Launch(format!("failed to configure browser download: {e}")))?;
    let fetcher = BrowserFetcher::new(options);
    let info = fetcher
        .fetch()
        .await
        .map_err(|e| EvaluateError::Launch(format!("failed to download chromium: {e}")))?;

    Ok(info.executable_path)
}
