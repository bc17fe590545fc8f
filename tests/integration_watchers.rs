//! Integration tests for the watchers against the in-memory page

use pagesettle::dom::Node;
use pagesettle::growth::{watch_growth, GrowthOptions};
use pagesettle::images::wait_for_images;
use pagesettle::page::{MemoryPage, SizeSource};
use pagesettle::{SettleConfig, Stabilizer, WaitOutcome};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Replays a fixed sequence of extents, then repeats the last one
struct ScriptedExtent {
    values: Mutex<VecDeque<u64>>,
    last: AtomicU64,
    reads: AtomicU64,
}

impl ScriptedExtent {
    fn new(values: &[u64]) -> Self {
        Self {
            values: Mutex::new(values.iter().copied().collect()),
            last: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SizeSource for ScriptedExtent {
    fn sample(&self) -> u64 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.values.lock().unwrap().pop_front() {
            Some(v) => {
                self.last.store(v, Ordering::SeqCst);
                v
            }
            None => self.last.load(Ordering::SeqCst),
        }
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test(start_paused = true)]
async fn images_resolve_after_last_settle_and_not_before() {
    init_logging();
    let page = Arc::new(MemoryPage::new());
    let imgs: Vec<_> = (0..3).map(|i| page.insert_image(&format!("{}.png", i))).collect();

    let stabilizer = Arc::new(Stabilizer::new(page.clone()));
    let handle = {
        let s = stabilizer.clone();
        tokio::spawn(async move { s.wait_for_images().await })
    };

    imgs[0].load();
    sleep(Duration::from_millis(10)).await;
    imgs[1].fail();
    sleep(Duration::from_millis(10)).await;
    assert!(!handle.is_finished());

    imgs[2].load();
    let report = handle.await.unwrap();
    assert_eq!(report.outcome, WaitOutcome::Settled);
    assert_eq!(report.tracked, 3);
    assert_eq!(report.settled, 3);
    assert_eq!(page.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dynamically_inserted_image_is_waited_for() {
    init_logging();
    let page = Arc::new(MemoryPage::new());
    let first = page.insert_image("first.png");
    let cancel = CancellationToken::new();

    let handle = {
        let page = page.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { wait_for_images(&*page, Duration::from_secs(30), &cancel).await })
    };
    sleep(Duration::from_millis(5)).await;

    // A gallery arrives before the first image settles
    let nested = page.create_image("gallery/1.png");
    let gallery = page.create_element("section", vec![Node::Image(nested.clone())]);
    page.append(gallery);
    sleep(Duration::from_millis(5)).await;

    first.load();
    sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished(), "watcher must wait for the nested image");

    nested.load();
    let report = handle.await.unwrap();
    assert_eq!(report.outcome, WaitOutcome::Settled);
    assert_eq!(report.tracked, 2);
}

#[tokio::test(start_paused = true)]
async fn never_settling_image_times_out_at_deadline() {
    let page = MemoryPage::new();
    let _stuck = page.insert_image("stuck.png");
    let config = SettleConfig { image_timeout_ms: 30_000, ..Default::default() };
    let stabilizer = Stabilizer::with_config(page, config).unwrap();

    let start = Instant::now();
    let report = stabilizer.wait_for_images().await;
    assert_eq!(report.outcome, WaitOutcome::TimedOut);
    assert_eq!(start.elapsed(), Duration::from_millis(30_000));
    assert_eq!(report.tracked, 1);
    assert_eq!(report.settled, 0);
    assert_eq!(stabilizer.document().observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn detached_image_stays_tracked() {
    let page = Arc::new(MemoryPage::new());
    let img = page.insert_image("a.png");
    let cancel = CancellationToken::new();
    let handle = {
        let page = page.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { wait_for_images(&*page, Duration::from_secs(1), &cancel).await })
    };
    sleep(Duration::from_millis(5)).await;
    assert!(page.remove(img.id()));

    let report = handle.await.unwrap();
    assert_eq!(report.outcome, WaitOutcome::TimedOut);
    assert_eq!(report.tracked, 1);
}

#[tokio::test(start_paused = true)]
async fn six_identical_samples_resolve() {
    let source = ScriptedExtent::new(&[100, 100, 100, 100, 100, 100]);
    let start = Instant::now();
    let report = watch_growth(&source, &GrowthOptions::default(), &CancellationToken::new()).await;
    assert_eq!(report.outcome, WaitOutcome::Settled);
    assert_eq!(report.samples, 6);
    assert_eq!(source.reads(), 6);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn change_resets_the_streak() {
    // 200 at index 3 and the drop back to 100 at index 4 both reset; the five
    // unchanged comparisons after index 4 end at index 9.
    let source = ScriptedExtent::new(&[100, 100, 100, 200, 100, 100, 100, 100, 100]);
    let report = watch_growth(&source, &GrowthOptions::default(), &CancellationToken::new()).await;
    assert_eq!(report.outcome, WaitOutcome::Settled);
    assert_eq!(report.samples, 10);
    assert_eq!(report.extent, 100);
}

#[tokio::test(start_paused = true)]
async fn custom_interval_and_streak() {
    let page = MemoryPage::new();
    page.set_heights(900, 1000);
    let stabilizer = Stabilizer::new(page);
    let start = Instant::now();
    let report = stabilizer
        .detect_dynamic_content_stable(Some(Duration::from_millis(250)), Some(2))
        .await;
    assert_eq!(report.outcome, WaitOutcome::Settled);
    assert_eq!(report.samples, 3);
    assert_eq!(report.extent, 1000);
    assert_eq!(start.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn growing_page_respects_max_wait() {
    let height = Arc::new(AtomicU64::new(0));
    let source = {
        let height = height.clone();
        move || height.fetch_add(10, Ordering::SeqCst)
    };
    let opts = GrowthOptions {
        max_wait: Some(Duration::from_millis(3500)),
        ..Default::default()
    };
    let report = watch_growth(&source, &opts, &CancellationToken::new()).await;
    assert_eq!(report.outcome, WaitOutcome::TimedOut);
    assert_eq!(report.samples, 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_abandons_both_watchers() {
    let page = Arc::new(MemoryPage::new());
    let _stuck = page.insert_image("stuck.png");
    let stabilizer = Arc::new(Stabilizer::new(page.clone()));

    let images = {
        let s = stabilizer.clone();
        tokio::spawn(async move { s.wait_for_images().await })
    };
    let growth = {
        let s = stabilizer.clone();
        let height = AtomicU64::new(0);
        tokio::spawn(async move {
            // keep the page growing so only cancellation can end the wait
            let grow = async {
                loop {
                    sleep(Duration::from_millis(500)).await;
                    s.document().set_body_height(height.fetch_add(1, Ordering::SeqCst));
                }
            };
            tokio::select! {
                report = s.detect_dynamic_content_stable(None, None) => report,
                _ = grow => unreachable!(),
            }
        })
    };

    sleep(Duration::from_secs(10)).await;
    assert_eq!(page.observer_count(), 1);
    stabilizer.cancel();

    assert_eq!(images.await.unwrap().outcome, WaitOutcome::Cancelled);
    assert_eq!(growth.await.unwrap().outcome, WaitOutcome::Cancelled);
    assert_eq!(page.observer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn prepare_for_capture_clamps_height() {
    let page = MemoryPage::new();
    let img = page.insert_image("hero.png");
    img.load();
    page.set_heights(40_000, 720);
    let stabilizer = Stabilizer::new(page);

    let report = stabilizer
        .prepare_for_capture(&pagesettle::CaptureOptions { dark_mode: true, ..Default::default() })
        .await;
    assert_eq!(report.images.unwrap().outcome, WaitOutcome::Settled);
    assert_eq!(report.growth.unwrap().outcome, WaitOutcome::Settled);
    assert_eq!(report.full_height, 40_000);
    assert_eq!(report.capture_height, 16_384);
    assert_eq!(stabilizer.document().root_classes(), vec!["dark".to_string()]);
    assert_eq!(stabilizer.document().style_count(), 1);
}
