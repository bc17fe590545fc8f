//! Image-completion watcher
//!
//! Resolves once every image-like element that was present at start, or was
//! inserted while waiting, has loaded or failed. A hard timeout guarantees the
//! caller always gets an answer.

use crate::dom::{ImageElement, MutationFeed, NodeId};
use crate::page::Document;
use crate::WaitOutcome;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Hard upper bound on how long `wait_for_images` waits
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Summary of one `wait_for_images` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReport {
    pub outcome: WaitOutcome,
    /// Images tracked over the watcher's lifetime
    pub tracked: usize,
    /// Images that reached a terminal state
    pub settled: usize,
}

/// Append-only set of images a watcher waits on.
///
/// Members are never evicted, even when detached from the page, so a set
/// reused against a long-lived page with churning images keeps growing.
#[derive(Default)]
pub struct TrackedSet {
    members: Vec<ImageElement>,
    seen: HashSet<NodeId>,
    settled: usize,
}

impl TrackedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `image`.
    ///
    /// Returns the future to wait on when the image is new and still pending.
    /// Already-settled images are counted on the spot; repeats are ignored.
    pub fn track(&mut self, image: ImageElement) -> Option<BoxFuture<'static, ()>> {
        if !self.seen.insert(image.id()) {
            return None;
        }
        let waiter = if image.state().is_settled() {
            self.settled += 1;
            None
        } else {
            Some(image.settled())
        };
        debug!("tracking image #{} ({})", image.id(), image.src());
        self.members.push(image);
        waiter
    }

    /// Record one terminal-state event
    pub fn mark_settled(&mut self) {
        self.settled += 1;
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn settled(&self) -> usize {
        self.settled
    }

    pub fn is_complete(&self) -> bool {
        self.settled == self.members.len()
    }

    pub fn members(&self) -> &[ImageElement] {
        &self.members
    }
}

/// Wait until every tracked image has settled, `timeout` elapses, or `cancel`
/// fires.
///
/// The mutation subscription is dropped before returning, whichever way the
/// wait ends.
pub async fn wait_for_images<D: Document + ?Sized>(
    doc: &D,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ImageReport {
    let started = Instant::now();
    let (snapshot, mut feed) = doc.observe_images();

    let mut set = TrackedSet::new();
    let mut pending = FuturesUnordered::new();
    for image in snapshot {
        if let Some(waiter) = set.track(image) {
            pending.push(waiter);
        }
    }
    debug!(
        "image watcher started: {} tracked, {} already settled",
        set.len(),
        set.settled()
    );

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut feed_open = true;

    let outcome = loop {
        if set.is_complete() {
            // Insertions published before this point still count.
            if feed_open && drain_queued(&mut feed, &mut set, &mut pending) {
                continue;
            }
            break WaitOutcome::Settled;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break WaitOutcome::Cancelled,
            _ = &mut deadline => break WaitOutcome::TimedOut,
            record = feed.next(), if feed_open => match record {
                Some(record) => {
                    for image in record.images() {
                        if let Some(waiter) = set.track(image) {
                            pending.push(waiter);
                        }
                    }
                }
                None => feed_open = false,
            },
            Some(()) = pending.next() => set.mark_settled(),
        }
    };
    drop(feed);

    match outcome {
        WaitOutcome::Settled => info!(
            "all {} image(s) settled after {}ms",
            set.len(),
            started.elapsed().as_millis()
        ),
        WaitOutcome::TimedOut => warn!(
            "image wait timed out after {}ms with {}/{} settled",
            timeout.as_millis(),
            set.settled(),
            set.len()
        ),
        WaitOutcome::Cancelled => debug!(
            "image wait cancelled with {}/{} settled",
            set.settled(),
            set.len()
        ),
    }

    ImageReport {
        outcome,
        tracked: set.len(),
        settled: set.settled(),
    }
}

/// Track images from records already queued on the feed.
/// Returns true when that left the set incomplete.
fn drain_queued(
    feed: &mut MutationFeed,
    set: &mut TrackedSet,
    pending: &mut FuturesUnordered<BoxFuture<'static, ()>>,
) -> bool {
    while let Some(record) = feed.try_next() {
        for image in record.images() {
            if let Some(waiter) = set.track(image) {
                pending.push(waiter);
            }
        }
    }
    !set.is_complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryPage;

    #[test]
    fn settled_images_count_on_track() {
        let mut set = TrackedSet::new();
        let done = ImageElement::new(1, "done.png");
        done.load();
        assert!(set.track(done).is_none());
        assert!(set.track(ImageElement::new(2, "later.png")).is_some());
        assert_eq!(set.len(), 2);
        assert_eq!(set.settled(), 1);
        assert!(!set.is_complete());
    }

    #[test]
    fn repeated_identity_is_tracked_once() {
        let mut set = TrackedSet::new();
        let img = ImageElement::new(7, "a.png");
        assert!(set.track(img.clone()).is_some());
        assert!(set.track(img).is_none());
        assert_eq!(set.len(), 1);
        assert_eq!(set.members()[0].id(), 7);
        assert_eq!(set.members()[0].src(), "a.png");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_resolves_immediately() {
        let page = MemoryPage::new();
        let report = wait_for_images(&page, DEFAULT_IMAGE_TIMEOUT, &CancellationToken::new()).await;
        assert_eq!(report.outcome, WaitOutcome::Settled);
        assert_eq!(report.tracked, 0);
        assert_eq!(page.observer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn insertion_in_same_turn_as_last_settle_is_waited_for() {
        let page = MemoryPage::new();
        let first = page.insert_image("first.png");
        let cancel = CancellationToken::new();

        let mut watcher = Box::pin(wait_for_images(&page, Duration::from_secs(5), &cancel));
        assert!(futures::poll!(&mut watcher).is_pending());

        // Both events land before the watcher runs again.
        first.load();
        let late = page.insert_image("late.png");
        assert!(futures::poll!(&mut watcher).is_pending());

        late.fail();
        let report = watcher.await;
        assert_eq!(report.outcome, WaitOutcome::Settled);
        assert_eq!(report.tracked, 2);
        assert_eq!(report.settled, 2);
        assert_eq!(page.observer_count(), 0);
    }
}
