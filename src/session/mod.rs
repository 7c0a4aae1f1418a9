//! Stream session orchestration.
//!
//! A session wires capture, encoder, segment server and renderer control
//! into one lifecycle. Each session runs as a single actor task, so state
//! transitions are serialized and a late success can never race teardown.
//!
//! Teardown always runs in the same order: stop the renderer (best effort),
//! stop accepting segment waits, stop the encoder, then shut the server down.

mod retry;
mod state;

pub use retry::{with_retry, RetryPolicy};
pub use state::{SessionError, SessionState, SessionStatus};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capture::{CaptureBackend, CaptureRegion};
use crate::config::Config;
use crate::dlna::{ControlClient, RendererDescriptor, TransportState};
use crate::encoder::{EncoderFactory, EncoderHandle, EncoderHealth, EncoderSupervisor};
use crate::net;
use crate::streaming::{SegmentServer, SegmentStore};
use crate::{Error, Result};

/// Upper bound on the best-effort renderer stop during teardown.
const RENDERER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts and stops cast sessions.
pub struct Caster {
    config: Arc<Config>,
    backend: Arc<dyn CaptureBackend>,
    factory: Arc<dyn EncoderFactory>,
}

impl Caster {
    pub fn new(
        config: Config,
        backend: Arc<dyn CaptureBackend>,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            factory,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start casting `region` to `renderer`.
    ///
    /// Returns once the session task is running; progress is reported through
    /// the handle.
    pub fn start_session(
        &self,
        region: CaptureRegion,
        renderer: RendererDescriptor,
    ) -> Result<SessionHandle> {
        self.spawn(region, Some(renderer))
    }

    /// Encode and serve `region` without driving any renderer.
    pub fn start_preview(&self, region: CaptureRegion) -> Result<SessionHandle> {
        self.spawn(region, None)
    }

    /// Stop a session and wait for its teardown to finish.
    pub async fn stop_session(&self, handle: &SessionHandle) -> SessionStatus {
        handle.stop().await
    }

    pub fn session_status(&self, handle: &SessionHandle) -> SessionStatus {
        handle.status()
    }

    fn spawn(
        &self,
        region: CaptureRegion,
        renderer: Option<RendererDescriptor>,
    ) -> Result<SessionHandle> {
        let id = Uuid::new_v4();
        let control = Arc::new(ControlClient::new(&self.config.control)?);
        let store = Arc::new(SegmentStore::new(self.config.encoder.retain_segments));
        let supervisor =
            EncoderSupervisor::new(self.backend.clone(), self.factory.clone(), store.clone());

        let (status_tx, status_rx) = watch::channel(SessionStatus::new(
            id,
            renderer.as_ref().map(|r| r.friendly_name.clone()),
        ));
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            id,
            config: self.config.clone(),
            region,
            renderer,
            control,
            store,
            supervisor,
            status: status_tx,
            cancel: cancel.clone(),
            server: None,
            encoder: None,
            renderer_engaged: false,
        };
        tokio::spawn(actor.run());

        Ok(SessionHandle {
            id,
            status: status_rx,
            cancel,
        })
    }
}

/// Caller-side handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Request a stop and wait until teardown has finished.
    pub async fn stop(&self) -> SessionStatus {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for a terminal state.
    pub async fn wait(&self) -> SessionStatus {
        self.wait_until(|s| s.is_terminal()).await
    }

    /// Wait until the session is in `state` or has ended.
    pub async fn wait_for_state(&self, state: SessionState) -> SessionStatus {
        self.wait_until(|s| s == state || s.is_terminal()).await
    }

    async fn wait_until(&self, mut done: impl FnMut(SessionState) -> bool) -> SessionStatus {
        let mut rx = self.status.clone();
        let result = rx.wait_for(|s| done(s.state)).await.map(|s| s.clone());
        match result {
            Ok(status) => status,
            // The actor is gone; its last word is final.
            Err(_) => rx.borrow().clone(),
        }
    }
}

/// Why the live part of a session ended.
enum Exit {
    /// The caller asked to stop.
    Requested,
    /// The renderer reported playback ended.
    DeviceStopped,
    Failed(Error),
}

impl From<Error> for Exit {
    fn from(e: Error) -> Self {
        Exit::Failed(e)
    }
}

struct SessionActor {
    id: Uuid,
    config: Arc<Config>,
    region: CaptureRegion,
    renderer: Option<RendererDescriptor>,
    control: Arc<ControlClient>,
    store: Arc<SegmentStore>,
    supervisor: EncoderSupervisor,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    server: Option<SegmentServer>,
    encoder: Option<EncoderHandle>,
    /// Set once the renderer may have been pointed at our stream.
    renderer_engaged: bool,
}

impl SessionActor {
    async fn run(mut self) {
        let exit = match self.drive().await {
            Ok(exit) | Err(exit) => exit,
        };

        self.teardown().await;

        match exit {
            Exit::Requested => self.finish(SessionState::Stopped, None),
            Exit::DeviceStopped => {
                tracing::info!(session = %self.id, "Renderer stopped playback");
                self.finish(SessionState::Stopped, None);
            }
            Exit::Failed(e) => {
                tracing::error!(session = %self.id, "Session failed: {}", e);
                self.finish(SessionState::Error, Some(SessionError::from(&e)));
            }
        }
    }

    async fn drive(&mut self) -> std::result::Result<Exit, Exit> {
        let renderer = self.renderer.clone();
        let format = self.config.encoder.format;
        let host = net::advertised_host(
            self.config.server.advertise_host.as_deref(),
            renderer.as_ref().and_then(|r| r.host()).as_deref(),
        )
        .await;

        let server = SegmentServer::bind(&self.config.server, self.store.clone()).await?;
        let server_addr = server.local_addr();
        let stream_url = server.stream_url(&host, format);
        self.server = Some(server);
        self.status.send_modify(|s| {
            s.server_addr = Some(server_addr);
            s.stream_url = Some(stream_url.clone());
        });

        let encoder = self
            .supervisor
            .start(&self.region, &self.config.encoder)
            .await?;
        let mut health = encoder.subscribe();
        self.encoder = Some(encoder);
        self.transition(SessionState::Encoding)?;

        let Some(renderer) = renderer else {
            tracing::info!(session = %self.id, "Serving {} without a renderer", stream_url);
            return self.step(&mut health, std::future::pending::<Result<Exit>>()).await;
        };

        self.transition(SessionState::Discovered)?;

        let policy = RetryPolicy::from_config(&self.config.control);
        let control = self.control.clone();

        self.renderer_engaged = true;
        self.step(
            &mut health,
            with_retry(&policy, "SetAVTransportURI", || {
                control.set_source(&renderer, &stream_url, format)
            }),
        )
        .await?;
        self.transition(SessionState::Casting)?;

        self.step(
            &mut health,
            with_retry(&policy, "Play", || control.play(&renderer)),
        )
        .await?;
        self.transition(SessionState::Playing)?;

        Ok(self.monitor(&renderer, &mut health).await)
    }

    /// Run `fut` unless the caller stops or the encoder fails first.
    async fn step<T>(
        &self,
        health: &mut watch::Receiver<EncoderHealth>,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Exit> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Exit::Requested),
            err = encoder_failure(health) => Err(Exit::Failed(err)),
            result = fut => result.map_err(Exit::Failed),
        }
    }

    /// Poll the renderer until playback ends, the caller stops, or the
    /// encoder fails.
    async fn monitor(
        &self,
        renderer: &RendererDescriptor,
        health: &mut watch::Receiver<EncoderHealth>,
    ) -> Exit {
        let control = &self.config.control;
        let mut tick = tokio::time::interval(control.state_poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        let mut stopped_polls = 0;
        let mut failed_polls = 0;

        loop {
            let poll = async {
                tick.tick().await;
                self.control.query_state(renderer).await
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Requested,
                err = encoder_failure(health) => return Exit::Failed(err),
                result = poll => result,
            };

            match result {
                Ok(TransportState::Stopped | TransportState::Error) => {
                    failed_polls = 0;
                    stopped_polls += 1;
                    if stopped_polls >= control.stopped_polls_before_exit.max(1) {
                        return Exit::DeviceStopped;
                    }
                }
                Ok(_) => {
                    failed_polls = 0;
                    stopped_polls = 0;
                }
                Err(e) => {
                    failed_polls += 1;
                    tracing::warn!(
                        device = %renderer.friendly_name,
                        "Transport state poll failed ({}/{}): {}",
                        failed_polls,
                        control.max_poll_failures,
                        e
                    );
                    if failed_polls >= control.max_poll_failures.max(1) {
                        return Exit::Failed(match e {
                            e @ (Error::DeviceUnreachable { .. }
                            | Error::DeviceRejected { .. }) => e,
                            other => Error::unreachable(renderer.friendly_name.clone(), other),
                        });
                    }
                }
            }
        }
    }

    async fn teardown(&mut self) {
        tracing::info!(session = %self.id, "Tearing down session");

        if let Some(renderer) = self.renderer.as_ref().filter(|_| self.renderer_engaged) {
            match tokio::time::timeout(RENDERER_STOP_TIMEOUT, self.control.stop(renderer)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(device = %renderer.friendly_name, "Renderer stop failed: {}", e)
                }
                Err(_) => {
                    tracing::warn!(device = %renderer.friendly_name, "Renderer stop timed out")
                }
            }
        }

        if let Some(server) = &self.server {
            server.stop_waits();
        }

        if let Some(mut encoder) = self.encoder.take() {
            let health = encoder.stop().await;
            tracing::debug!(session = %self.id, health = ?health, "Encoder released");
        }

        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
    }

    fn transition(&self, next: SessionState) -> Result<()> {
        let current = self.status.borrow().state;
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.status.send_modify(|s| s.state = next);
        tracing::info!(session = %self.id, "Session {} -> {}", current, next);
        Ok(())
    }

    fn finish(&self, state: SessionState, error: Option<SessionError>) {
        let current = self.status.borrow().state;
        if !current.can_transition_to(state) {
            tracing::warn!(session = %self.id, "Ignoring {} -> {}", current, state);
            return;
        }
        self.status.send_modify(|s| {
            s.state = state;
            s.last_error = error;
        });
        tracing::info!(session = %self.id, "Session {} -> {}", current, state);
    }
}

/// Resolve once the encoder reports a failure.
async fn encoder_failure(health: &mut watch::Receiver<EncoderHealth>) -> Error {
    loop {
        if let Some(err) = health.borrow_and_update().to_error() {
            return err;
        }
        if health.changed().await.is_err() {
            return health
                .borrow()
                .to_error()
                .unwrap_or_else(|| Error::Internal("encoder task ended unexpectedly".into()));
        }
    }
}
