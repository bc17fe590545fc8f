//! Minimal DOM vocabulary shared by the watchers and page backends
//!
//! Only what the helpers observe is modelled: image-like elements with a load
//! state, inserted subtrees, and the subscription that delivers them.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Identity of a node within one page
pub type NodeId = u64;

/// Load state of an image-like element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Errored,
}

impl LoadState {
    /// Loaded and errored are both terminal.
    pub fn is_settled(self) -> bool {
        !matches!(self, LoadState::Pending)
    }
}

/// Handle to an image-like element (`<img>`, `<input type=image>`, SVG `<image>`).
///
/// Clones share the same load state, so a page backend can keep one handle
/// while watchers hold others.
#[derive(Clone)]
pub struct ImageElement {
    id: NodeId,
    src: String,
    state: Arc<watch::Sender<LoadState>>,
}

impl ImageElement {
    pub fn new(id: NodeId, src: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(LoadState::Pending);
        Self {
            id,
            src: src.into(),
            state: Arc::new(tx),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn state(&self) -> LoadState {
        *self.state.borrow()
    }

    /// Move the element into a terminal state.
    ///
    /// Only the first terminal transition is recorded; returns `false` when
    /// the element had already settled or `outcome` is `Pending`.
    pub fn finish(&self, outcome: LoadState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_settled() || !outcome.is_settled() {
                return false;
            }
            *current = outcome;
            true
        })
    }

    /// Shorthand for `finish(LoadState::Loaded)`
    pub fn load(&self) -> bool {
        self.finish(LoadState::Loaded)
    }

    /// Shorthand for `finish(LoadState::Errored)`
    pub fn fail(&self) -> bool {
        self.finish(LoadState::Errored)
    }

    /// Future completing once the element reaches a terminal state.
    pub fn settled(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.state.subscribe();
        async move {
            // The sender lives as long as any handle; an error means every
            // handle is gone and nothing can settle it anymore.
            let _ = rx.wait_for(|s| s.is_settled()).await;
        }
        .boxed()
    }
}

impl std::fmt::Debug for ImageElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageElement")
            .field("id", &self.id)
            .field("src", &self.src)
            .field("state", &self.state())
            .finish()
    }
}

/// A node inserted into (or present in) the page body
#[derive(Debug, Clone)]
pub enum Node {
    Image(ImageElement),
    Element { id: NodeId, tag: String, children: Vec<Node> },
    Text(String),
}

impl Node {
    pub fn id(&self) -> Option<NodeId> {
        match self {
            Node::Image(img) => Some(img.id()),
            Node::Element { id, .. } => Some(*id),
            Node::Text(_) => None,
        }
    }

    /// Every image in this subtree, in document order.
    pub fn images(&self) -> Vec<ImageElement> {
        let mut out = Vec::new();
        self.collect_images(&mut out);
        out
    }

    fn collect_images(&self, out: &mut Vec<ImageElement>) {
        match self {
            Node::Image(img) => out.push(img.clone()),
            Node::Element { children, .. } => {
                for child in children {
                    child.collect_images(out);
                }
            }
            Node::Text(_) => {}
        }
    }
}

/// A batch of subtree insertions observed in one mutation callback
#[derive(Debug, Clone, Default)]
pub struct MutationRecord {
    pub added: Vec<Node>,
}

impl MutationRecord {
    pub fn images(&self) -> Vec<ImageElement> {
        self.added.iter().flat_map(Node::images).collect()
    }
}

/// Subscription to subtree insertions. Dropping it unsubscribes.
#[derive(Debug)]
pub struct MutationFeed {
    rx: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationFeed {
    /// Create a feed and the sender a page backend keeps to publish records.
    pub fn channel() -> (mpsc::UnboundedSender<MutationRecord>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next record; `None` once the page stops publishing.
    pub async fn next(&mut self) -> Option<MutationRecord> {
        self.rx.recv().await
    }

    /// Take a record that has already been published, without waiting.
    pub fn try_next(&mut self) -> Option<MutationRecord> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_is_set_once() {
        let img = ImageElement::new(1, "a.png");
        assert_eq!(img.state(), LoadState::Pending);
        assert!(img.fail());
        assert!(!img.load());
        assert_eq!(img.state(), LoadState::Errored);
        assert!(!img.finish(LoadState::Pending));
    }

    #[test]
    fn subtree_images_are_collected_in_order() {
        let a = ImageElement::new(2, "a.png");
        let b = ImageElement::new(4, "b.png");
        let tree = Node::Element {
            id: 1,
            tag: "div".into(),
            children: vec![
                Node::Image(a),
                Node::Text("caption".into()),
                Node::Element { id: 3, tag: "picture".into(), children: vec![Node::Image(b)] },
            ],
        };
        let ids: Vec<_> = tree.images().iter().map(ImageElement::id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[tokio::test]
    async fn settled_future_sees_earlier_transition() {
        let img = ImageElement::new(1, "a.png");
        let fut = img.settled();
        img.load();
        fut.await;
    }
}
