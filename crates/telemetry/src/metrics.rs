use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Acquisition Metrics ====
    pub static ref SURVEILLANCE_FRAMES_ACQUIRED: IntCounter = {
        let metric = IntCounter::new(
            "surveillance_frames_acquired_total",
            "Total number of frames read from frame sources",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SURVEILLANCE_FRAME_READ_FAILURES: IntCounter = {
        let metric = IntCounter::new(
            "surveillance_frame_read_failures_total",
            "Total number of frame reads that returned an error",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Queue Metrics ====
    pub static ref SURVEILLANCE_QUEUE_DROPPED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "surveillance_queue_dropped_total",
                "Total number of items dropped because a bounded queue was full",
            ),
            &["queue"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Processing Metrics ====
    pub static ref SURVEILLANCE_FRAMES_PROCESSED: IntCounter = {
        let metric = IntCounter::new(
            "surveillance_frames_processed_total",
            "Total number of frames run through detection and identity resolution",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SURVEILLANCE_FRAME_PROCESSING_TIME: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "surveillance_frame_processing_seconds",
                "Time spent processing a single frame",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SURVEILLANCE_CAPABILITY_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "surveillance_capability_failures_total",
                "Failures reported by external capabilities (absorbed per unit of work)",
            ),
            &["capability"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Identity Metrics ====
    pub static ref SURVEILLANCE_IDENTITY_RESOLUTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "surveillance_identity_resolutions_total",
                "Gallery resolutions performed for tracks",
            ),
            &["reason", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SURVEILLANCE_TRACKS_CACHED: IntGauge = {
        let metric = IntGauge::new(
            "surveillance_tracks_cached",
            "Number of track records currently held in the track cache",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SURVEILLANCE_TRACKS_EVICTED: IntCounter = {
        let metric = IntCounter::new(
            "surveillance_tracks_evicted_total",
            "Track records evicted after not being seen for the eviction window",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Alert Metrics ====
    pub static ref SURVEILLANCE_ALERTS_RAISED: IntCounter = {
        let metric = IntCounter::new(
            "surveillance_alerts_raised_total",
            "Unknown-person alerts raised by the alert policy",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
