//! Pipeline controller: wires the capabilities to the two workers and owns
//! the stop signal, the output queues, and the frame source's lifetime.

use crate::acquisition::{run_acquisition, AcquisitionSettings};
use crate::alerting::{AlertDispatcher, AlertNotifier, LogNotifier};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::processing::{ProcessingOutputs, ProcessingWorker};
use crate::queue::{lossy_channel, LossyReceiver, Recv, EVENT_QUEUE, FRAME_QUEUE, RESULTS_QUEUE};
use common::{AnnotatedFrame, DetectionEvent, Detector, EmbeddingExtractor, FrameSource};
use identity::{Gallery, GalleryResolver, IdentityResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn FrameSource>>,
    detector: Option<Box<dyn Detector>>,
    extractor: Option<Arc<dyn EmbeddingExtractor>>,
    gallery: Option<Arc<Gallery>>,
    resolver: Option<Arc<dyn IdentityResolver>>,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl FrameSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_detector(mut self, detector: impl Detector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn with_extractor(mut self, extractor: impl EmbeddingExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Known faces; resolved with the configured identification threshold
    pub fn with_gallery(mut self, gallery: impl Into<Arc<Gallery>>) -> Self {
        self.gallery = Some(gallery.into());
        self
    }

    /// Replace gallery resolution entirely
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Add an alert channel. Without any, alerts go to the log.
    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Open the source and spawn both workers on the current runtime
    pub async fn start(self) -> Result<SurveillancePipeline, PipelineError> {
        let Self {
            config,
            source,
            detector,
            extractor,
            gallery,
            resolver,
            mut notifiers,
        } = self;

        config.validate()?;
        let mut source =
            source.ok_or_else(|| PipelineError::invalid_config("a frame source is required"))?;
        let detector =
            detector.ok_or_else(|| PipelineError::invalid_config("a detector is required"))?;
        let extractor = extractor
            .ok_or_else(|| PipelineError::invalid_config("an embedding extractor is required"))?;

        let resolver: Arc<dyn IdentityResolver> = match resolver {
            Some(resolver) => resolver,
            None => {
                let gallery = gallery.unwrap_or_else(|| Arc::new(Gallery::empty()));
                if gallery.is_empty() {
                    warn!("Gallery is empty, every person will be reported as Unknown");
                }
                Arc::new(GalleryResolver::new(gallery, config.identification_threshold))
            }
        };

        if notifiers.is_empty() {
            notifiers.push(Arc::new(LogNotifier));
        }

        source.open().await.map_err(PipelineError::SourceOpen)?;

        let (frames_tx, frames_rx) = lossy_channel(FRAME_QUEUE, config.frame_queue_capacity);
        let (results_tx, results_rx) = lossy_channel(RESULTS_QUEUE, config.results_queue_capacity);
        let (events_tx, events_rx) = lossy_channel(EVENT_QUEUE, config.event_queue_capacity);

        let cancel = CancellationToken::new();

        let settings = AcquisitionSettings {
            width: config.processing_width,
            height: config.processing_height,
            retry_delay: config.read_retry_delay(),
        };
        let acquisition = tokio::spawn(run_acquisition(
            source,
            frames_tx,
            settings,
            cancel.child_token(),
        ));

        let worker = ProcessingWorker::new(
            &config,
            detector,
            extractor,
            resolver,
            AlertDispatcher::new(notifiers),
            ProcessingOutputs {
                results: results_tx,
                events: events_tx,
            },
        );
        let processing = tokio::spawn(worker.run(
            frames_rx,
            config.frame_poll_timeout(),
            cancel.child_token(),
        ));

        info!(
            source = %config.source_label,
            width = config.processing_width,
            height = config.processing_height,
            "Surveillance pipeline started"
        );

        Ok(SurveillancePipeline {
            cancel,
            acquisition: Some(acquisition),
            processing: Some(processing),
            results: results_rx,
            events: events_rx,
            source_label: config.source_label,
        })
    }
}

/// A running pipeline for one frame source
pub struct SurveillancePipeline {
    cancel: CancellationToken,
    acquisition: Option<JoinHandle<anyhow::Result<()>>>,
    processing: Option<JoinHandle<()>>,
    results: LossyReceiver<AnnotatedFrame>,
    events: LossyReceiver<DetectionEvent>,
    source_label: String,
}

impl SurveillancePipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn is_running(&self) -> bool {
        self.acquisition.is_some() && !self.cancel.is_cancelled()
    }

    /// Token that stops the pipeline's workers when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next annotated frame, or `None` if nothing arrives within `timeout`
    /// or the pipeline has stopped and the queue is drained
    pub async fn poll_annotated_frame(&mut self, timeout: Duration) -> Option<AnnotatedFrame> {
        match self.results.recv_timeout(timeout).await {
            Recv::Item(frame) => Some(frame),
            Recv::TimedOut | Recv::Closed => None,
        }
    }

    pub async fn poll_detection_event(&mut self, timeout: Duration) -> Option<DetectionEvent> {
        match self.events.recv_timeout(timeout).await {
            Recv::Item(event) => Some(event),
            Recv::TimedOut | Recv::Closed => None,
        }
    }

    /// Signal both workers and wait for them. The acquisition worker releases
    /// the frame source as it exits.
    ///
    /// Items already queued stay available to the poll methods.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        let (Some(acquisition), Some(processing)) =
            (self.acquisition.take(), self.processing.take())
        else {
            return Err(PipelineError::AlreadyStopped);
        };

        self.cancel.cancel();

        let mut outcome = match acquisition.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to release frame source");
                Err(PipelineError::SourceRelease(e))
            }
            Err(e) => {
                error!(error = %e, "Acquisition worker did not shut down cleanly");
                Err(PipelineError::WorkerPanicked("acquisition"))
            }
        };

        if let Err(e) = processing.await {
            error!(error = %e, "Processing worker did not shut down cleanly");
            if outcome.is_ok() {
                outcome = Err(PipelineError::WorkerPanicked("processing"));
            }
        }

        info!(source = %self.source_label, "Surveillance pipeline stopped");
        outcome
    }
}

/// Dropping without `stop` still cancels both workers; the acquisition
/// worker releases the source in the background.
impl Drop for SurveillancePipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
