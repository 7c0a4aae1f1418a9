//! Runs one encoder for one session.
//!
//! A single task owns the frame source and the encoder, so neither needs a
//! lock. It feeds frames at the configured rate, polls for finalized
//! segments, publishes them to the [`SegmentStore`], and reports health on a
//! watch channel. A crashed encoder is reported, never restarted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{Encoder, EncoderFactory, EncoderHealth};
use crate::capture::{CaptureBackend, CaptureRegion, FrameSource};
use crate::config::EncoderConfig;
use crate::streaming::SegmentStore;
use crate::Result;

/// Upper bound on waiting for the encoder task after cancellation.
const STOP_GRACE: Duration = Duration::from_secs(10);

pub struct EncoderSupervisor {
    backend: Arc<dyn CaptureBackend>,
    factory: Arc<dyn EncoderFactory>,
    store: Arc<SegmentStore>,
}

impl EncoderSupervisor {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        factory: Arc<dyn EncoderFactory>,
        store: Arc<SegmentStore>,
    ) -> Self {
        Self {
            backend,
            factory,
            store,
        }
    }

    /// Resolve `region`, open the frame source, and start encoding.
    ///
    /// Fails with `CaptureUnavailable` when the region cannot be captured and
    /// with `Tool` when the encoder cannot be started.
    pub async fn start(
        &self,
        region: &CaptureRegion,
        config: &EncoderConfig,
    ) -> Result<EncoderHandle> {
        let displays = self.backend.displays()?;
        let bounds = region.resolve(&displays)?;
        let source = self.backend.open(bounds, config.width, config.height)?;

        let mut encoder = self.factory.create();
        encoder.start(config).await?;
        tracing::info!(
            encoder = encoder.name(),
            "Encoding {} ({}) at {}x{}",
            region,
            bounds,
            config.width,
            config.height
        );

        let (health_tx, health_rx) = watch::channel(EncoderHealth::Alive);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            encoder,
            source,
            self.store.clone(),
            config.clone(),
            health_tx,
            cancel.clone(),
        ));

        Ok(EncoderHandle {
            health: health_rx,
            cancel,
            task: Some(task),
        })
    }
}

/// Handle to a running encoder.
pub struct EncoderHandle {
    health: watch::Receiver<EncoderHealth>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EncoderHandle {
    pub fn health(&self) -> EncoderHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EncoderHealth> {
        self.health.clone()
    }

    /// Stop encoding and release the encoder's resources.
    ///
    /// Returns the final health: `Stopped`, or the failure that ended it.
    pub async fn stop(&mut self) -> EncoderHealth {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(STOP_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Encoder task failed: {}", e),
                Err(_) => {
                    tracing::warn!("Encoder task did not stop within {:?}, aborting", STOP_GRACE);
                    task.abort();
                }
            }
        }
        self.health()
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut encoder: Box<dyn Encoder>,
    mut source: Box<dyn FrameSource>,
    store: Arc<SegmentStore>,
    config: EncoderConfig,
    health: watch::Sender<EncoderHealth>,
    cancel: CancellationToken,
) {
    let mut frame_tick = tokio::time::interval(config.frame_interval());
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut poll_tick = tokio::time::interval(config.poll_interval());
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failure: Option<EncoderHealth> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = poll_tick.tick() => {
                publish_new_output(&mut *encoder, &store).await;
                let current = encoder.health();
                if current.is_failed() {
                    failure = Some(current);
                    break;
                }
            }

            _ = frame_tick.tick() => {
                let frame = match source.next_frame().await {
                    Ok(frame) => frame,
                    Err(e) => {
                        failure = Some(EncoderHealth::CaptureLost { message: e.to_string() });
                        break;
                    }
                };
                if let Err(e) = encoder.feed_frame(&frame).await {
                    let current = encoder.health();
                    if current.is_failed() {
                        failure = Some(current);
                        break;
                    }
                    tracing::warn!("Failed to feed frame to {}: {}", encoder.name(), e);
                }
            }
        }
    }

    if let Some(failure) = &failure {
        tracing::error!(encoder = encoder.name(), health = ?failure, "Encoder failed");
        health.send_replace(failure.clone());
    }

    if let Err(e) = encoder.stop().await {
        tracing::warn!("Failed to stop {}: {}", encoder.name(), e);
    }
    if failure.is_none() {
        health.send_replace(EncoderHealth::Stopped);
    }
    tracing::info!(encoder = encoder.name(), "Encoder stopped");
}

async fn publish_new_output(encoder: &mut dyn Encoder, store: &SegmentStore) {
    match encoder.poll_new_output().await {
        Ok(segments) => {
            for segment in segments {
                store.publish(segment.duration_secs, segment.data);
            }
        }
        Err(e) => tracing::warn!("Failed to collect output from {}: {}", encoder.name(), e),
    }
}
