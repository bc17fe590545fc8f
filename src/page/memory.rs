//! In-memory page model for deterministic tests and embedding

use super::Document;
use crate::dom::{ImageElement, MutationFeed, MutationRecord, Node, NodeId};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Default)]
struct PageState {
    body: Vec<Node>,
    styles: Vec<(String, String)>,
    metas: Vec<(String, String)>,
    root_classes: Vec<String>,
    color_scheme: Option<String>,
    media_overrides: HashMap<String, bool>,
    events: Vec<String>,
    reflows: u64,
    body_height: u64,
    document_height: u64,
    observers: Vec<UnboundedSender<MutationRecord>>,
}

/// A page whose DOM lives in a `Mutex`.
///
/// Inserting nodes notifies every live observer synchronously, the same way a
/// `MutationObserver` callback would be queued by the browser.
pub struct MemoryPage {
    state: Mutex<PageState>,
    next_id: AtomicU64,
}

impl MemoryPage {
    pub fn new() -> Self {
        MemoryPage {
            state: Mutex::new(PageState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> NodeId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a detached image element
    pub fn create_image(&self, src: &str) -> ImageElement {
        ImageElement::new(self.allocate_id(), src)
    }

    /// Create a detached element wrapping `children`
    pub fn create_element(&self, tag: &str, children: Vec<Node>) -> Node {
        Node::Element {
            id: self.allocate_id(),
            tag: tag.to_string(),
            children,
        }
    }

    /// Append a subtree to the body and notify observers
    pub fn append(&self, node: Node) {
        self.append_all(vec![node]);
    }

    /// Append several subtrees as one mutation record
    pub fn append_all(&self, nodes: Vec<Node>) {
        let mut state = self.lock();
        state.body.extend(nodes.iter().cloned());
        let record = MutationRecord { added: nodes };
        state.observers.retain(|tx| tx.send(record.clone()).is_ok());
        debug!(
            "memory page: appended {} node(s), {} observer(s) notified",
            record.added.len(),
            state.observers.len()
        );
    }

    /// Create an image, append it to the body and return its handle
    pub fn insert_image(&self, src: &str) -> ImageElement {
        let img = self.create_image(src);
        self.append(Node::Image(img.clone()));
        img
    }

    /// Detach a top-level node from the body. Watchers keep tracking it.
    pub fn remove(&self, id: NodeId) -> bool {
        let mut state = self.lock();
        let before = state.body.len();
        state.body.retain(|n| n.id() != Some(id));
        state.body.len() != before
    }

    pub fn set_heights(&self, body: u64, document: u64) {
        let mut state = self.lock();
        state.body_height = body;
        state.document_height = document;
    }

    pub fn set_body_height(&self, body: u64) {
        self.lock().body_height = body;
    }

    /// Number of subscriptions that are still listening
    pub fn observer_count(&self) -> usize {
        self.lock().observers.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn style_count(&self) -> usize {
        self.lock().styles.len()
    }

    pub fn style(&self, id: &str) -> Option<String> {
        self.lock()
            .styles
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, css)| css.clone())
    }

    pub fn meta_count(&self, name: &str) -> usize {
        self.lock().metas.iter().filter(|(n, _)| n == name).count()
    }

    pub fn meta_content(&self, name: &str) -> Option<String> {
        self.lock()
            .metas
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
    }

    pub fn root_classes(&self) -> Vec<String> {
        self.lock().root_classes.clone()
    }

    pub fn color_scheme(&self) -> Option<String> {
        self.lock().color_scheme.clone()
    }

    pub fn media_matches(&self, query: &str) -> Option<bool> {
        self.lock().media_overrides.get(query).copied()
    }

    pub fn dispatched_events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn reflow_count(&self) -> u64 {
        self.lock().reflows
    }
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl Document for MemoryPage {
    fn observe_images(&self) -> (Vec<ImageElement>, MutationFeed) {
        let mut state = self.lock();
        let images = state.body.iter().flat_map(Node::images).collect();
        let (tx, feed) = MutationFeed::channel();
        state.observers.push(tx);
        (images, feed)
    }

    fn body_scroll_height(&self) -> u64 {
        self.lock().body_height
    }

    fn document_scroll_height(&self) -> u64 {
        self.lock().document_height
    }

    fn has_style(&self, id: &str) -> bool {
        self.lock().styles.iter().any(|(sid, _)| sid == id)
    }

    fn inject_style(&self, id: &str, css: &str) {
        self.lock().styles.push((id.to_string(), css.to_string()));
    }

    fn set_color_scheme(&self, scheme: &str) {
        self.lock().color_scheme = Some(scheme.to_string());
    }

    fn has_meta(&self, name: &str) -> bool {
        self.lock().metas.iter().any(|(n, _)| n == name)
    }

    fn append_meta(&self, name: &str, content: &str) {
        self.lock().metas.push((name.to_string(), content.to_string()));
    }

    fn add_root_class(&self, class: &str) {
        let mut state = self.lock();
        if !state.root_classes.iter().any(|c| c == class) {
            state.root_classes.push(class.to_string());
        }
    }

    fn override_media(&self, query: &str, matches: bool) {
        self.lock().media_overrides.insert(query.to_string(), matches);
    }

    fn dispatch_event(&self, name: &str) {
        self.lock().events.push(name.to_string());
    }

    fn force_reflow(&self) {
        self.lock().reflows += 1;
    }
}
