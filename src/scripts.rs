//! Injectable JavaScript renditions of the helpers
//!
//! `PAGE_HELPERS` installs `window.pageSettle` (once per document); the
//! `Helper` calls below are evaluated after it by a CDP driver. Results are
//! JSON shaped like the native reports so they deserialize into them.
//!
//! CDP hands back objects as remote references, not values, so drivers run
//! `Helper::encoded_script` and decode the JSON string it resolves to with
//! `decode_result`.

use crate::{Error, Result, SettleConfig};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Global the helper bundle installs itself under
pub const HELPER_NAMESPACE: &str = "pageSettle";

pub const PAGE_HELPERS: &str = r#"
(() => {
    if (window.pageSettle) {
        return;
    }

    const STYLE_ID = 'pagesettle-no-smooth-scroll';
    const STYLE_CSS = '*, *::before, *::after { scroll-behavior: auto !important; }';
    // Only <img> exposes `complete` for loads that finished earlier
    const IMAGE_SELECTOR = 'img';

    const isImageLike = (node) =>
        node.nodeType === Node.ELEMENT_NODE && node.matches(IMAGE_SELECTOR);

    const isSettled = (el) => el.complete;

    const fullHeight = () => Math.max(
        document.body ? document.body.scrollHeight : 0,
        document.documentElement.scrollHeight
    );

    window.pageSettle = {
        disableSmoothScrolling() {
            if (document.getElementById(STYLE_ID)) {
                return false;
            }
            const style = document.createElement('style');
            style.id = STYLE_ID;
            style.textContent = STYLE_CSS;
            (document.head || document.documentElement).appendChild(style);
            return true;
        },

        waitForAllImages(timeoutMs = 30000) {
            return new Promise((resolve) => {
                const tracked = new Set();
                let settled = 0;
                let done = false;
                let observer = null;
                let timer = null;

                const finish = (outcome) => {
                    if (done) return;
                    done = true;
                    if (observer) observer.disconnect();
                    clearTimeout(timer);
                    resolve({ outcome, tracked: tracked.size, settled });
                };
                const check = () => {
                    if (settled === tracked.size) finish('settled');
                };
                const track = (el) => {
                    if (tracked.has(el)) return;
                    tracked.add(el);
                    if (isSettled(el)) {
                        settled++;
                        return;
                    }
                    const onSettle = () => {
                        el.removeEventListener('load', onSettle);
                        el.removeEventListener('error', onSettle);
                        settled++;
                        check();
                    };
                    el.addEventListener('load', onSettle);
                    el.addEventListener('error', onSettle);
                };

                observer = new MutationObserver((mutations) => {
                    for (const mutation of mutations) {
                        for (const node of mutation.addedNodes) {
                            if (node.nodeType !== Node.ELEMENT_NODE) continue;
                            if (isImageLike(node)) track(node);
                            node.querySelectorAll(IMAGE_SELECTOR).forEach(track);
                        }
                    }
                    check();
                });
                observer.observe(document.documentElement, { childList: true, subtree: true });
                document.querySelectorAll(IMAGE_SELECTOR).forEach(track);
                timer = setTimeout(() => finish('timedOut'), timeoutMs);
                check();
            });
        },

        getFullHeight() {
            return fullHeight();
        },

        detectDynamicContentStable(intervalMs = 1000, streak = 5, maxWaitMs = null) {
            return new Promise((resolve) => {
                const started = Date.now();
                let last = fullHeight();
                let run = 0;
                let samples = 1;
                if (streak <= 0) {
                    resolve({ outcome: 'settled', samples, extent: last });
                    return;
                }
                const tick = () => {
                    const current = fullHeight();
                    samples++;
                    if (current === last) {
                        run++;
                        if (run >= streak) {
                            resolve({ outcome: 'settled', samples, extent: last });
                            return;
                        }
                    } else {
                        run = 0;
                        last = current;
                    }
                    if (maxWaitMs !== null && Date.now() - started >= maxWaitMs) {
                        resolve({ outcome: 'timedOut', samples, extent: last });
                        return;
                    }
                    setTimeout(tick, intervalMs);
                };
                setTimeout(tick, intervalMs);
            });
        },

        forceDarkMode() {
            const root = document.documentElement;
            root.style.colorScheme = 'dark';
            if (!document.querySelector('meta[name="color-scheme"]')) {
                const meta = document.createElement('meta');
                meta.name = 'color-scheme';
                meta.content = 'dark';
                (document.head || root).appendChild(meta);
            }
            const query = window.matchMedia('(prefers-color-scheme: dark)');
            try {
                Object.defineProperty(query, 'matches', { get: () => true, configurable: true });
            } catch (e) {}
            window.dispatchEvent(new Event('dark-mode-change'));
            root.classList.add('dark');
            document.dispatchEvent(new CustomEvent('darkmode', { detail: { darkMode: true } }));
            if (document.body) {
                document.body.style.display = 'none';
                void document.body.offsetHeight;
                document.body.style.display = '';
            }
            return true;
        },
    };
})();
"#;

/// The operations exposed to an automation driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    DisableSmoothScroll,
    WaitForImages,
    FullHeight,
    DetectStable,
    ForceDarkMode,
}

impl Helper {
    pub const ALL: [Helper; 5] = [
        Helper::DisableSmoothScroll,
        Helper::WaitForImages,
        Helper::FullHeight,
        Helper::DetectStable,
        Helper::ForceDarkMode,
    ];

    /// Operation name used on the command line
    pub fn name(self) -> &'static str {
        match self {
            Helper::DisableSmoothScroll => "disable-smooth-scroll",
            Helper::WaitForImages => "wait-for-images",
            Helper::FullHeight => "get-full-height",
            Helper::DetectStable => "detect-dynamic-content-stable",
            Helper::ForceDarkMode => "force-dark-mode",
        }
    }

    /// Method on `window.pageSettle`
    pub fn function_name(self) -> &'static str {
        match self {
            Helper::DisableSmoothScroll => "disableSmoothScrolling",
            Helper::WaitForImages => "waitForAllImages",
            Helper::FullHeight => "getFullHeight",
            Helper::DetectStable => "detectDynamicContentStable",
            Helper::ForceDarkMode => "forceDarkMode",
        }
    }

    fn args(self, config: &SettleConfig) -> Vec<Value> {
        match self {
            Helper::WaitForImages => vec![json!(config.image_timeout_ms)],
            Helper::DetectStable => vec![
                json!(config.poll_interval_ms),
                json!(config.required_unchanged),
                json!(config.stable_timeout_ms),
            ],
            _ => Vec::new(),
        }
    }

    /// Call expression for this helper; assumes `PAGE_HELPERS` ran first.
    pub fn call(self, config: &SettleConfig) -> String {
        let target = format!("window.{}.{}", HELPER_NAMESPACE, self.function_name());
        build_js_call(&target, &self.args(config))
    }

    /// Self-contained expression: installs the helpers, then calls this one.
    pub fn script(self, config: &SettleConfig) -> String {
        format!("{}\n{};", PAGE_HELPERS.trim(), self.call(config))
    }

    /// Like `script`, but resolving to the result as a JSON string.
    ///
    /// Always a promise, so evaluate it with `await_promise` set.
    pub fn encoded_script(self, config: &SettleConfig) -> String {
        format!("{}\n{};", PAGE_HELPERS.trim(), stringify_result(&self.call(config)))
    }
}

/// Wrap `expression` so it resolves to its result as a JSON string.
///
/// `undefined` is encoded as `null`.
pub fn stringify_result(expression: &str) -> String {
    format!(
        "Promise.resolve({}).then((v) => JSON.stringify(v === undefined ? null : v))",
        expression
    )
}

/// Decode what an `encoded_script` or `stringify_result` evaluation returned.
pub fn decode_result<T: DeserializeOwned>(raw: Option<&Value>) -> Result<T> {
    match raw {
        Some(Value::String(text)) => Ok(serde_json::from_str(text)?),
        Some(other) => Err(Error::ScriptError(format!("expected a JSON string, got {}", other))),
        None => Err(Error::ScriptError("evaluation returned no value".into())),
    }
}

impl fmt::Display for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Helper {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Helper::ALL
            .into_iter()
            .find(|h| h.name() == s || h.function_name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = Helper::ALL.iter().map(|h| h.name()).collect();
                Error::ConfigError(format!("unknown helper '{}' (expected one of: {})", s, known.join(", ")))
            })
    }
}

/// `target(arg, ...)` with JSON-encoded arguments
pub fn build_js_call(target: &str, args: &[Value]) -> String {
    let args_str = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", target, args_str)
}
