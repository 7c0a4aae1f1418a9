//! AVTransport control of a renderer.

use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use super::didl;
use super::soap::{self, extract_tag, parse_fault};
use super::RendererDescriptor;
use crate::config::{ControlConfig, StreamFormat};
use crate::{Error, Result};

/// Transport state as last confirmed by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Transitioning,
    Paused,
    Error,
}

impl TransportState {
    /// Map `CurrentTransportState` / `CurrentTransportStatus` values.
    pub fn from_upnp(state: &str, status: Option<&str>) -> Option<Self> {
        if status.is_some_and(|s| s.eq_ignore_ascii_case("ERROR_OCCURRED")) {
            return Some(TransportState::Error);
        }
        match state.to_ascii_uppercase().as_str() {
            "PLAYING" => Some(TransportState::Playing),
            "TRANSITIONING" => Some(TransportState::Transitioning),
            "PAUSED_PLAYBACK" | "PAUSED_RECORDING" => Some(TransportState::Paused),
            "STOPPED" | "NO_MEDIA_PRESENT" => Some(TransportState::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Transitioning => "transitioning",
            TransportState::Paused => "paused",
            TransportState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Issues AVTransport commands and owns the [`TransportState`].
///
/// The client is the only writer of the transport state; readers get a
/// [`watch::Receiver`] from [`subscribe`](Self::subscribe). It does not retry.
pub struct ControlClient {
    http: reqwest::Client,
    state: watch::Sender<TransportState>,
    /// Renderer id whose `SetAVTransportURI` was acknowledged.
    accepted_source: Mutex<Option<String>>,
}

impl ControlClient {
    pub fn new(config: &ControlConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        let (state, _) = watch::channel(TransportState::default());

        Ok(Self {
            http,
            state,
            accepted_source: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    pub fn transport_state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Whether `renderer` has acknowledged a stream source.
    pub fn has_source(&self, renderer: &RendererDescriptor) -> bool {
        self.accepted_source.lock().as_deref() == Some(renderer.id.as_str())
    }

    /// Point the renderer at `stream_url`.
    pub async fn set_source(
        &self,
        renderer: &RendererDescriptor,
        stream_url: &str,
        format: StreamFormat,
    ) -> Result<()> {
        // A failed or in-flight SetAVTransportURI leaves no accepted source.
        self.accepted_source.lock().take();

        let metadata = didl::video_item(stream_url, format.mime_type(), didl::DEFAULT_TITLE);
        self.invoke(
            renderer,
            "SetAVTransportURI",
            &[("CurrentURI", stream_url), ("CurrentURIMetaData", &metadata)],
        )
        .await?;

        *self.accepted_source.lock() = Some(renderer.id.clone());
        tracing::info!(
            device = %renderer.friendly_name,
            url = %stream_url,
            "Stream source accepted"
        );
        Ok(())
    }

    /// Start playback. Refused locally until `set_source` succeeded for
    /// this renderer.
    pub async fn play(&self, renderer: &RendererDescriptor) -> Result<()> {
        if !self.has_source(renderer) {
            return Err(Error::SourceNotSet(renderer.friendly_name.clone()));
        }

        self.invoke(renderer, "Play", &[("Speed", "1")]).await?;
        self.state.send_replace(TransportState::Playing);
        tracing::info!(device = %renderer.friendly_name, "Playback started");
        Ok(())
    }

    pub async fn stop(&self, renderer: &RendererDescriptor) -> Result<()> {
        self.invoke(renderer, "Stop", &[]).await?;
        self.state.send_replace(TransportState::Stopped);
        tracing::info!(device = %renderer.friendly_name, "Playback stopped");
        Ok(())
    }

    /// Ask the renderer for its transport state and publish it.
    pub async fn query_state(&self, renderer: &RendererDescriptor) -> Result<TransportState> {
        let body = self.invoke(renderer, "GetTransportInfo", &[]).await?;

        let state = extract_tag(&body, "CurrentTransportState").ok_or_else(|| {
            Error::malformed(&renderer.control_url, "no CurrentTransportState in response")
        })?;
        let status = extract_tag(&body, "CurrentTransportStatus");
        let state = TransportState::from_upnp(&state, status.as_deref()).ok_or_else(|| {
            Error::malformed(&renderer.control_url, format!("unknown transport state {state:?}"))
        })?;

        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        tracing::debug!(device = %renderer.friendly_name, state = %state, "Transport state");
        Ok(state)
    }

    /// POST one SOAP action and return the response body.
    async fn invoke(
        &self,
        renderer: &RendererDescriptor,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<String> {
        let envelope = soap::envelope(action, args);
        tracing::debug!(device = %renderer.friendly_name, action, "Sending SOAP action");

        let response = self
            .http
            .post(&renderer.control_url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/xml; charset=\"utf-8\""),
            )
            .header("SOAPACTION", soap::soap_action(action))
            .body(envelope)
            .send()
            .await
            .map_err(|e| Error::unreachable(renderer.friendly_name.clone(), e))?;

        let status = response.status();
        // An unreadable body after a good status still counts as acknowledged.
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Error::DeviceRejected {
                device: renderer.friendly_name.clone(),
                action: action.to_string(),
                status: status.as_u16(),
                fault: parse_fault(&body),
            });
        }

        Ok(body)
    }
}
