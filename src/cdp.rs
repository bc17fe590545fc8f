//! Chrome DevTools Protocol session that runs the injected helpers

use crate::prepare::capture_height;
use crate::scripts::{decode_result, stringify_result, Helper};
use crate::{
    CaptureOptions, CaptureReport, Error, GrowthReport, ImageReport, Result, SettleConfig,
    DEFAULT_STABLE_TIMEOUT_MS,
};
use headless_chrome::browser::tab::Tab;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Browser launch settings
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// User agent override; Chrome's own when `None`
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    /// Upper bound for a single CDP call; raised to cover the configured
    /// helper bounds when those are longer
    pub timeout_ms: u64,
    /// Extra HTTP headers sent with every request
    pub headers: HashMap<String, String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            viewport: Viewport::default(),
            timeout_ms: 60_000,
            headers: HashMap::new(),
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A headless Chrome instance with one tab.
///
/// Helpers are evaluated together with the bundle that defines them, so they
/// keep working after the tab navigates. An unbounded growth watcher gets
/// `DEFAULT_STABLE_TIMEOUT_MS`, since every helper call has to return.
pub struct CdpSession {
    // Keeps the browser process alive for the tab's lifetime
    _browser: Browser,
    tab: Arc<Tab>,
    settle: SettleConfig,
}

impl CdpSession {
    pub fn launch(config: BrowserConfig, settle: SettleConfig) -> Result<Self> {
        settle.validate()?;
        if settle.stable_timeout_ms.is_none() {
            debug!("bounding growth watcher at {}ms", DEFAULT_STABLE_TIMEOUT_MS);
        }
        let settle = settle.bounded();
        let floor = Duration::from_millis(config.timeout_ms);
        let call_timeout = settle.call_timeout().map_or(floor, |t| t.max(floor));

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(call_timeout);

        if let Some(ua) = &config.user_agent {
            tab.set_user_agent(ua, None, None)
                .map_err(|e| Error::InitializationError(format!("Failed to set user agent: {}", e)))?;
        }

        if !config.headers.is_empty() {
            let headers: HashMap<&str, &str> = config
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tab.set_extra_http_headers(headers)
                .map_err(|e| Error::InitializationError(format!("Failed to set headers: {}", e)))?;
        }

        info!(
            "headless Chrome ready ({}x{})",
            config.viewport.width, config.viewport.height
        );

        Ok(Self {
            _browser: browser,
            tab,
            settle,
        })
    }

    pub fn settle_config(&self) -> &SettleConfig {
        &self.settle
    }

    pub fn load_url(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;
        debug!("navigated to {}", url);
        Ok(())
    }

    /// Evaluate one helper and return its JSON result.
    pub fn run_helper(&mut self, helper: Helper) -> Result<serde_json::Value> {
        self.run_typed(helper)
    }

    /// Evaluate an arbitrary expression in the page's global context
    pub fn evaluate(&mut self, expression: &str) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(&stringify_result(expression), true)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        decode_result(result.value.as_ref())
    }

    fn run_typed<T: DeserializeOwned>(&mut self, helper: Helper) -> Result<T> {
        let script = helper.encoded_script(&self.settle);
        let result = self
            .tab
            .evaluate(&script, true)
            .map_err(|e| Error::ScriptError(format!("{} failed: {}", helper, e)))?;
        decode_result(result.value.as_ref())
            .map_err(|e| Error::ScriptError(format!("{} returned an unreadable result: {}", helper, e)))
    }

    pub fn disable_smooth_scroll(&mut self) -> Result<bool> {
        self.run_typed(Helper::DisableSmoothScroll)
    }

    pub fn wait_for_images(&mut self) -> Result<ImageReport> {
        self.run_typed(Helper::WaitForImages)
    }

    pub fn get_full_height(&mut self) -> Result<u64> {
        // scrollHeight may carry a fraction
        let height: f64 = self.run_typed(Helper::FullHeight)?;
        Ok(height.max(0.0).round() as u64)
    }

    pub fn detect_dynamic_content_stable(&mut self) -> Result<GrowthReport> {
        self.run_typed(Helper::DetectStable)
    }

    pub fn force_dark_mode(&mut self) -> Result<()> {
        self.run_typed::<bool>(Helper::ForceDarkMode).map(|_| ())
    }

    /// Same steps as `Stabilizer::prepare_for_capture`, run one after another.
    ///
    /// A failed height read falls back to the maximum capture height.
    pub fn prepare_for_capture(&mut self, options: &CaptureOptions) -> Result<CaptureReport> {
        if options.dark_mode {
            self.force_dark_mode()?;
        }
        self.disable_smooth_scroll()?;

        let images = if options.wait_for_images {
            Some(self.wait_for_images()?)
        } else {
            None
        };
        let growth = if options.wait_for_growth {
            Some(self.detect_dynamic_content_stable()?)
        } else {
            None
        };

        let full_height = match self.get_full_height() {
            Ok(h) => h,
            Err(e) => {
                warn!("Failed to read page height, using maximum: {}", e);
                0
            }
        };

        Ok(CaptureReport {
            images,
            growth,
            full_height,
            capture_height: capture_height(full_height, self.settle.max_capture_height),
        })
    }

    pub fn close(self) -> Result<()> {
        self.tab
            .close(true)
            .map_err(|e| Error::CdpError(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }
}
