//! Backpressure behaviour of the lossy queues
//!
//! Producers must never block and queues must never grow past their
//! capacity, whether the consumer is slow or absent.

use anyhow::Result;
use async_trait::async_trait;
use common::{Detector, TrackedDetection};
use image::RgbImage;
use std::time::Duration;
use surveillance_node::mock::{MeanColorExtractor, ScriptedFrameSource};
use surveillance_node::queue::{lossy_channel, Offer, Recv};
use surveillance_node::{PipelineConfig, SurveillancePipeline};
use telemetry::metrics::SURVEILLANCE_QUEUE_DROPPED;

/// Detector that takes its time, so frames pile up upstream
struct SlowDetector(Duration);

#[async_trait]
impl Detector for SlowDetector {
    async fn detect_and_track(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<TrackedDetection>> {
        tokio::time::sleep(self.0).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn burst_into_small_queue_keeps_at_most_capacity() {
    let (tx, mut rx) = lossy_channel("burst", 5);

    let mut accepted = 0;
    for frame in 0..200u32 {
        match tx.offer(frame) {
            Offer::Accepted => accepted += 1,
            Offer::Dropped => {}
            Offer::Closed => panic!("receiver is alive"),
        }
    }
    assert_eq!(accepted, 5);
    assert_eq!(
        SURVEILLANCE_QUEUE_DROPPED.with_label_values(&["burst"]).get(),
        195
    );

    let mut available = Vec::new();
    while let Recv::Item(frame) = rx.recv_timeout(Duration::from_millis(5)).await {
        available.push(frame);
    }
    // drop-newest: the oldest survivors are kept in order
    assert_eq!(available, vec![0, 1, 2, 3, 4]);

    // room again after draining
    assert_eq!(tx.offer(999), Offer::Accepted);
}

#[tokio::test]
async fn slow_processing_never_blocks_acquisition() -> Result<()> {
    let config = PipelineConfig {
        processing_width: 32,
        processing_height: 32,
        frame_poll_timeout_ms: 20,
        read_retry_delay_ms: 5,
        ..Default::default()
    };
    let source = ScriptedFrameSource::solid(32, 32, [50, 60, 70]);
    let reads = source.read_counter();
    let dropped_before = SURVEILLANCE_QUEUE_DROPPED
        .with_label_values(&["frames"])
        .get();

    let mut pipeline = SurveillancePipeline::builder(config)
        .with_source(source)
        .with_detector(SlowDetector(Duration::from_millis(25)))
        .with_extractor(MeanColorExtractor)
        .start()
        .await?;

    // nobody drains the results while processing crawls
    tokio::time::sleep(Duration::from_millis(300)).await;
    pipeline.stop().await?;

    // acquisition kept reading far beyond what processing could take
    let reads = reads.load(std::sync::atomic::Ordering::SeqCst);
    assert!(reads > 50, "only {reads} reads");
    assert!(
        SURVEILLANCE_QUEUE_DROPPED
            .with_label_values(&["frames"])
            .get()
            > dropped_before
    );

    let mut buffered = 0;
    while pipeline
        .poll_annotated_frame(Duration::from_millis(5))
        .await
        .is_some()
    {
        buffered += 1;
    }
    assert!((1..=5).contains(&buffered), "buffered {buffered}");
    Ok(())
}
