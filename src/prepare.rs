//! One-shot page mutations and the size metric
//!
//! Each mutation checks for an earlier application first, so repeating a
//! preparation step never duplicates styles, meta tags or classes.

use crate::page::Document;
use log::debug;

/// Id of the style element injected by `disable_smooth_scroll`
pub const SMOOTH_SCROLL_STYLE_ID: &str = "pagesettle-no-smooth-scroll";

pub const SMOOTH_SCROLL_CSS: &str =
    "*, *::before, *::after { scroll-behavior: auto !important; }";

pub const DARK_SCHEME_QUERY: &str = "(prefers-color-scheme: dark)";

/// Largest viewport height a capture is prepared for
pub const MAX_CAPTURE_HEIGHT: u64 = 16_384;

/// Force instant scrolling on every element.
///
/// Returns `true` when the override was injected by this call.
pub fn disable_smooth_scroll<D: Document + ?Sized>(doc: &D) -> bool {
    if doc.has_style(SMOOTH_SCROLL_STYLE_ID) {
        debug!("smooth scrolling already disabled");
        return false;
    }
    doc.inject_style(SMOOTH_SCROLL_STYLE_ID, SMOOTH_SCROLL_CSS);
    true
}

/// Switch the page to a dark color scheme.
///
/// Covers the `color-scheme` property, the `color-scheme` meta tag, the media
/// query used by `media` strategy stylesheets and the `dark` root class used by
/// `class` strategy ones, then nudges scripts with `dark-mode-change` and
/// `darkmode` events and forces a reflow.
pub fn force_dark_mode<D: Document + ?Sized>(doc: &D) {
    doc.set_color_scheme("dark");
    if !doc.has_meta("color-scheme") {
        doc.append_meta("color-scheme", "dark");
    }
    doc.override_media(DARK_SCHEME_QUERY, true);
    doc.dispatch_event("dark-mode-change");
    doc.add_root_class("dark");
    doc.dispatch_event("darkmode");
    doc.force_reflow();
}

/// Current page extent: the larger of the body and root scroll heights.
pub fn get_full_height<D: Document + ?Sized>(doc: &D) -> u64 {
    doc.body_scroll_height().max(doc.document_scroll_height())
}

/// Viewport height to capture `full_height` with.
///
/// A zero height usually means layout was not readable, so the maximum is
/// used instead.
pub fn capture_height(full_height: u64, max_height: u64) -> u64 {
    if full_height == 0 {
        max_height
    } else {
        full_height.min(max_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPage;

    #[test]
    fn smooth_scroll_override_is_injected_once() {
        let page = MemoryPage::new();
        assert!(disable_smooth_scroll(&page));
        assert!(!disable_smooth_scroll(&page));
        assert_eq!(page.style_count(), 1);
        assert!(page.style(SMOOTH_SCROLL_STYLE_ID).unwrap().contains("scroll-behavior: auto"));
    }

    #[test]
    fn dark_mode_touches_every_strategy() {
        let page = MemoryPage::new();
        force_dark_mode(&page);
        assert_eq!(page.color_scheme().as_deref(), Some("dark"));
        assert_eq!(page.meta_content("color-scheme").as_deref(), Some("dark"));
        assert_eq!(page.media_matches(DARK_SCHEME_QUERY), Some(true));
        assert_eq!(page.root_classes(), vec!["dark".to_string()]);
        assert_eq!(page.dispatched_events(), vec!["dark-mode-change", "darkmode"]);
        assert_eq!(page.reflow_count(), 1);
    }

    #[test]
    fn dark_mode_twice_adds_no_duplicates() {
        let page = MemoryPage::new();
        force_dark_mode(&page);
        force_dark_mode(&page);
        assert_eq!(page.meta_count("color-scheme"), 1);
        assert_eq!(page.root_classes(), vec!["dark".to_string()]);
        assert_eq!(page.color_scheme().as_deref(), Some("dark"));
    }

    #[test]
    fn existing_color_scheme_meta_is_left_alone() {
        let page = MemoryPage::new();
        page.append_meta("color-scheme", "light dark");
        force_dark_mode(&page);
        assert_eq!(page.meta_count("color-scheme"), 1);
        assert_eq!(page.meta_content("color-scheme").as_deref(), Some("light dark"));
    }

    #[test]
    fn full_height_reads_have_no_side_effects() {
        let page = MemoryPage::new();
        page.set_heights(640, 480);
        assert_eq!(get_full_height(&page), get_full_height(&page));
        assert_eq!(page.reflow_count(), 0);
        assert_eq!(page.style_count(), 0);
    }

    #[test]
    fn full_height_takes_the_larger_metric() {
        let page = MemoryPage::new();
        page.set_heights(1200, 900);
        assert_eq!(get_full_height(&page), 1200);
        page.set_heights(700, 900);
        assert_eq!(get_full_height(&page), 900);
    }

    #[test]
    fn capture_height_is_clamped() {
        assert_eq!(capture_height(2000, MAX_CAPTURE_HEIGHT), 2000);
        assert_eq!(capture_height(50_000, MAX_CAPTURE_HEIGHT), MAX_CAPTURE_HEIGHT);
        assert_eq!(capture_height(0, MAX_CAPTURE_HEIGHT), MAX_CAPTURE_HEIGHT);
    }
}
