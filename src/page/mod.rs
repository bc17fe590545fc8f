//! Page surface the helpers operate on
//!
//! `Document` is the small set of DOM reads and mutations the helpers need.
//! Backends implement it over whatever page model they own; `MemoryPage` is a
//! deterministic in-process implementation used by tests and embedders.

pub mod memory;

pub use memory::MemoryPage;

use crate::dom::{ImageElement, MutationFeed};
use std::sync::Arc;

/// DOM operations used by the watchers and preparation helpers.
///
/// Mutation methods apply their change and return immediately. Idempotence is
/// the caller's concern; `prepare` checks before it mutates.
pub trait Document: Send + Sync {
    /// Snapshot the image-like elements currently in the page and subscribe
    /// to later subtree insertions, as one step.
    fn observe_images(&self) -> (Vec<ImageElement>, MutationFeed);

    /// `document.body.scrollHeight`
    fn body_scroll_height(&self) -> u64;

    /// `document.documentElement.scrollHeight`
    fn document_scroll_height(&self) -> u64;

    /// Whether a style element with this id is present
    fn has_style(&self, id: &str) -> bool;

    /// Append a style element to the head
    fn inject_style(&self, id: &str, css: &str);

    /// Set the root element's `color-scheme` style property
    fn set_color_scheme(&self, scheme: &str);

    /// Whether a `<meta name=...>` is present
    fn has_meta(&self, name: &str) -> bool;

    /// Append a `<meta>` to the head
    fn append_meta(&self, name: &str, content: &str);

    /// `document.documentElement.classList.add(class)`
    fn add_root_class(&self, class: &str);

    /// Pin the result of a media query
    fn override_media(&self, query: &str, matches: bool);

    /// Dispatch a bare event on the window
    fn dispatch_event(&self, name: &str);

    /// Hide and re-show the body, reading layout in between
    fn force_reflow(&self);
}

impl<T: Document + ?Sized> Document for Arc<T> {
    fn observe_images(&self) -> (Vec<ImageElement>, MutationFeed) {
        (**self).observe_images()
    }

    fn body_scroll_height(&self) -> u64 {
        (**self).body_scroll_height()
    }

    fn document_scroll_height(&self) -> u64 {
        (**self).document_scroll_height()
    }

    fn has_style(&self, id: &str) -> bool {
        (**self).has_style(id)
    }

    fn inject_style(&self, id: &str, css: &str) {
        (**self).inject_style(id, css)
    }

    fn set_color_scheme(&self, scheme: &str) {
        (**self).set_color_scheme(scheme)
    }

    fn has_meta(&self, name: &str) -> bool {
        (**self).has_meta(name)
    }

    fn append_meta(&self, name: &str, content: &str) {
        (**self).append_meta(name, content)
    }

    fn add_root_class(&self, class: &str) {
        (**self).add_root_class(class)
    }

    fn override_media(&self, query: &str, matches: bool) {
        (**self).override_media(query, matches)
    }

    fn dispatch_event(&self, name: &str) {
        (**self).dispatch_event(name)
    }

    fn force_reflow(&self) {
        (**self).force_reflow()
    }
}

/// Source of size samples for the growth watcher
pub trait SizeSource: Send + Sync {
    fn sample(&self) -> u64;
}

impl<F> SizeSource for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn sample(&self) -> u64 {
        self()
    }
}
