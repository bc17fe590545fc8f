//! pagesettle
//!
//! Helpers an automation driver runs against a page before a full-page
//! capture: disable animated scrolling, force a dark color scheme, read the
//! page height, and, most importantly, wait until the page has stopped loading
//! visible content.
//!
//! # Features
//!
//! - **Image watcher**: waits for every image present or inserted later to load
//!   or fail, bounded by a hard timeout
//! - **Growth watcher**: waits until the page extent stops changing
//! - **Injected scripts**: the same helpers as JavaScript for real browsers
//! - **CDP backend** (`cdp` feature): drives headless Chrome through them
//!
//! # Example
//!
//! ```
//! use pagesettle::{page::MemoryPage, Stabilizer, WaitOutcome};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let page = MemoryPage::new();
//! let hero = page.insert_image("hero.png");
//! hero.load();
//!
//! let stabilizer = Stabilizer::new(page);
//! let report = stabilizer.wait_for_images().await;
//! assert_eq!(report.outcome, WaitOutcome::Settled);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod error;
pub use error::{Error, Result};

pub mod dom;
pub mod growth;
pub mod images;
pub mod page;
pub mod prepare;
pub mod scripts;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async facade over the CDP session (worker-thread backed)
#[cfg(feature = "cdp")]
pub mod async_api;

#[cfg(feature = "cdp")]
pub use async_api::CaptureBrowser;

pub use growth::{GrowthOptions, GrowthReport};
pub use images::ImageReport;
pub use page::Document;
pub use scripts::Helper;

/// How a watcher finished. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitOutcome {
    /// The awaited condition was reached
    Settled,
    /// The watcher's own bound elapsed first
    TimedOut,
    /// The caller abandoned the wait
    Cancelled,
}

/// Growth bound applied when a driver call has to return, see `SettleConfig::bounded`
pub const DEFAULT_STABLE_TIMEOUT_MS: u64 = 30_000;

// Round trip allowance on top of the slowest helper
const CALL_MARGIN_MS: u64 = 5_000;

/// Configuration for the watchers
///
/// The defaults match what capture drivers have historically used: a 30 second
/// image bound, one sample per second, and five unchanged samples in a row.
/// The growth watcher is unbounded unless `stable_timeout_ms` is set.
///
/// # Examples
///
/// ```
/// let cfg = pagesettle::SettleConfig::default();
/// assert_eq!(cfg.image_timeout_ms, 30_000);
/// assert!(cfg.stable_timeout_ms.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Hard bound for the image watcher in milliseconds
    pub image_timeout_ms: u64,
    /// Delay between size samples in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive unchanged samples needed to call the page stable
    pub required_unchanged: u32,
    /// Optional overall bound for the growth watcher in milliseconds
    pub stable_timeout_ms: Option<u64>,
    /// Heights above this are clamped when preparing a capture
    pub max_capture_height: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            image_timeout_ms: images::DEFAULT_IMAGE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: growth::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            required_unchanged: growth::DEFAULT_REQUIRED_UNCHANGED,
            stable_timeout_ms: None,
            max_capture_height: prepare::MAX_CAPTURE_HEIGHT,
        }
    }
}

impl SettleConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SettleConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_timeout_ms == 0 {
            return Err(Error::ConfigError("image_timeout_ms must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::ConfigError("poll_interval_ms must be positive".into()));
        }
        if self.max_capture_height == 0 {
            return Err(Error::ConfigError("max_capture_height must be positive".into()));
        }
        Ok(())
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    /// Copy with the growth watcher bounded; an explicit bound is kept.
    pub fn bounded(&self) -> Self {
        Self {
            stable_timeout_ms: Some(self.stable_timeout_ms.unwrap_or(DEFAULT_STABLE_TIMEOUT_MS)),
            ..self.clone()
        }
    }

    /// Longest an awaited helper may take, or `None` while the growth
    /// watcher is unbounded.
    ///
    /// The injected growth check looks at its bound once per sample, so it
    /// can overrun it by one interval.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.stable_timeout_ms.map(|stable| {
            let slowest = self.image_timeout_ms.max(stable + self.poll_interval_ms);
            Duration::from_millis(slowest + CALL_MARGIN_MS)
        })
    }

    pub fn growth_options(&self) -> GrowthOptions {
        GrowthOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            required_unchanged: self.required_unchanged,
            max_wait: self.stable_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Which steps `prepare_for_capture` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub dark_mode: bool,
    pub wait_for_images: bool,
    pub wait_for_growth: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            dark_mode: false,
            wait_for_images: true,
            wait_for_growth: true,
        }
    }
}

/// Outcome of a full capture preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReport {
    pub images: Option<ImageReport>,
    pub growth: Option<GrowthReport>,
    /// Page extent after the waits
    pub full_height: u64,
    /// `full_height` clamped to `max_capture_height`
    pub capture_height: u64,
}

/// Runs the helpers against one document.
///
/// Every watcher started through a `Stabilizer` listens to a child of its
/// cancellation token, so `cancel` abandons all of them, including ones
/// started later.
pub struct Stabilizer<D> {
    doc: D,
    config: SettleConfig,
    cancel: CancellationToken,
}

impl<D: Document> Stabilizer<D> {
    pub fn new(doc: D) -> Self {
        Self {
            doc,
            config: SettleConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(doc: D, config: SettleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            doc,
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn config(&self) -> &SettleConfig {
        &self.config
    }

    /// Abandon every in-flight and future watcher on this stabilizer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn disable_smooth_scroll(&self) -> bool {
        prepare::disable_smooth_scroll(&self.doc)
    }

    pub async fn wait_for_images(&self) -> ImageReport {
        let token = self.cancel.child_token();
        images::wait_for_images(&self.doc, self.config.image_timeout(), &token).await
    }

    pub fn get_full_height(&self) -> u64 {
        prepare::get_full_height(&self.doc)
    }

    /// Wait for the full height to stop changing.
    ///
    /// `interval` and `required_unchanged` override the configured values.
    pub async fn detect_dynamic_content_stable(
        &self,
        interval: Option<Duration>,
        required_unchanged: Option<u32>,
    ) -> GrowthReport {
        let mut options = self.config.growth_options();
        if let Some(interval) = interval {
            options.interval = interval;
        }
        if let Some(required) = required_unchanged {
            options.required_unchanged = required;
        }
        let token = self.cancel.child_token();
        let source = || prepare::get_full_height(&self.doc);
        growth::watch_growth(&source, &options, &token).await
    }

    pub async fn force_dark_mode(&self) {
        prepare::force_dark_mode(&self.doc);
    }

    /// Apply the preparation mutations, run both watchers concurrently, then
    /// measure the height to capture.
    pub async fn prepare_for_capture(&self, options: &CaptureOptions) -> CaptureReport {
        if options.dark_mode {
            self.force_dark_mode().await;
        }
        self.disable_smooth_scroll().await;

        let images = async {
            if options.wait_for_images {
                Some(self.wait_for_images().await)
            } else {
                None
            }
        };
        let growth = async {
            if options.wait_for_growth {
                Some(self.detect_dynamic_content_stable(None, None).await)
            } else {
                None
            }
        };
        let (images, growth) = tokio::join!(images, growth);

        let full_height = self.get_full_height();
        let capture_height = prepare::capture_height(full_height, self.config.max_capture_height);
        log::info!(
            "page prepared: full height {}, capturing {}",
            full_height,
            capture_height
        );

        CaptureReport {
            images,
            growth,
            full_height,
            capture_height,
        }
    }
}
