//! Shared test harness for integration tests.
//!
//! Provides a [`ScriptedEncoder`] that turns frames into fixed-size segments
//! without running any external tool, and a [`FakeRenderer`] that answers
//! device description and AVTransport SOAP requests through wiremock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use glasscast::capture::Frame;
use glasscast::config::{Config, EncoderConfig};
use glasscast::dlna::soap::AV_TRANSPORT;
use glasscast::dlna::RendererDescriptor;
use glasscast::encoder::{EncodedSegment, Encoder, EncoderFactory, EncoderHealth};
use glasscast::Error;

/// Session config tuned for fast loopback tests.
pub fn test_config() -> Config {
    let mut config = Config::default();

    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.server.advertise_host = Some("127.0.0.1".into());
    config.server.segment_wait_timeout_ms = 1500;

    config.encoder.fps = 10;
    config.encoder.width = 64;
    config.encoder.height = 36;
    config.encoder.poll_interval_ms = 20;
    config.encoder = config.encoder.with_retention_secs(4.0);

    config.control.request_timeout_ms = 2000;
    config.control.retry_min_delay_ms = 10;
    config.control.retry_max_delay_ms = 50;
    config.control.state_poll_interval_ms = 200;

    config
}

// ---------------------------------------------------------------------------
// Scripted encoder
// ---------------------------------------------------------------------------

/// Shared view of a [`ScriptedEncoder`] the test keeps after handing the
/// factory to a session.
#[derive(Clone, Default)]
pub struct EncoderProbe {
    frames: Arc<AtomicU64>,
    segments: Arc<AtomicU64>,
    killed: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl EncoderProbe {
    /// Make the encoder behave like a process that just died.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Emits one segment every `round(fps * segment_duration)` frames.
pub struct ScriptedEncoder {
    probe: EncoderProbe,
    frames_per_segment: u64,
    segment_secs: f64,
    pending_frames: u64,
    ready: Vec<EncodedSegment>,
    stopped: bool,
}

impl ScriptedEncoder {
    pub fn new(probe: EncoderProbe) -> Self {
        Self {
            probe,
            frames_per_segment: 1,
            segment_secs: 0.0,
            pending_frames: 0,
            ready: Vec::new(),
            stopped: false,
        }
    }
}

/// 4 TS packets; each segment is tagged with its index in the first payload byte.
fn segment_payload(index: u64) -> Bytes {
    let mut data = vec![0xFFu8; 188 * 4];
    for packet in data.chunks_mut(188) {
        packet[0] = 0x47;
    }
    data[1] = (index % 256) as u8;
    Bytes::from(data)
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&mut self, config: &EncoderConfig) -> glasscast::Result<()> {
        let per_segment = (config.fps as f64 * config.segment_duration_secs).round() as u64;
        self.frames_per_segment = per_segment.max(1);
        self.segment_secs = self.frames_per_segment as f64 / config.fps.max(1) as f64;
        self.probe.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn feed_frame(&mut self, _frame: &Frame) -> glasscast::Result<()> {
        if self.probe.killed.load(Ordering::SeqCst) {
            let gone = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "encoder gone");
            return Err(gone.into());
        }

        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        self.pending_frames += 1;
        if self.pending_frames >= self.frames_per_segment {
            self.pending_frames = 0;
            let index = self.probe.segments.fetch_add(1, Ordering::SeqCst);
            self.ready.push(EncodedSegment {
                duration_secs: self.segment_secs,
                data: segment_payload(index),
            });
        }
        Ok(())
    }

    async fn poll_new_output(&mut self) -> glasscast::Result<Vec<EncodedSegment>> {
        Ok(std::mem::take(&mut self.ready))
    }

    fn health(&mut self) -> EncoderHealth {
        if self.stopped {
            EncoderHealth::Stopped
        } else if self.probe.killed.load(Ordering::SeqCst) {
            EncoderHealth::Crashed { code: None }
        } else {
            EncoderHealth::Alive
        }
    }

    async fn stop(&mut self) -> glasscast::Result<()> {
        self.stopped = true;
        self.ready.clear();
        self.probe.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A factory whose encoders all report to the returned probe.
pub fn scripted_factory() -> (Arc<dyn EncoderFactory>, EncoderProbe) {
    let probe = EncoderProbe::default();
    let shared = probe.clone();
    let factory: Arc<dyn EncoderFactory> =
        Arc::new(move || Box::new(ScriptedEncoder::new(shared.clone())) as Box<dyn Encoder>);
    (factory, probe)
}

/// A factory whose encoders refuse to start.
pub fn failing_factory() -> Arc<dyn EncoderFactory> {
    struct Unstartable;

    #[async_trait]
    impl Encoder for Unstartable {
        fn name(&self) -> &str {
            "unstartable"
        }
        async fn start(&mut self, _config: &EncoderConfig) -> glasscast::Result<()> {
            Err(Error::tool("unstartable", "not installed"))
        }
        async fn feed_frame(&mut self, _frame: &Frame) -> glasscast::Result<()> {
            Ok(())
        }
        async fn poll_new_output(&mut self) -> glasscast::Result<Vec<EncodedSegment>> {
            Ok(Vec::new())
        }
        fn health(&mut self) -> EncoderHealth {
            EncoderHealth::Stopped
        }
        async fn stop(&mut self) -> glasscast::Result<()> {
            Ok(())
        }
    }

    Arc::new(|| Box::new(Unstartable) as Box<dyn Encoder>)
}

// ---------------------------------------------------------------------------
// Fake renderer
// ---------------------------------------------------------------------------

pub const CONTROL_PATH: &str = "/AVTransport/control";

/// Device description advertising one AVTransport service.
pub fn description_xml(name: &str, udn: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>{name}</friendlyName>
    <modelName>FakeTV</modelName>
    <UDN>{udn}</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
        <controlURL>/RenderingControl/control</controlURL>
      </service>
      <service>
        <serviceType>{AV_TRANSPORT}</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <controlURL>{CONTROL_PATH}</controlURL>
      </service>
    </serviceList>
  </device>
</root>"#
    )
}

/// Empty success response for `action`.
pub fn soap_ok(action: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body><u:{action}Response xmlns:u="{AV_TRANSPORT}"/></s:Body>
</s:Envelope>"#
    )
}

pub fn transport_info(state: &str, status: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:GetTransportInfoResponse xmlns:u="{AV_TRANSPORT}">
      <CurrentTransportState>{state}</CurrentTransportState>
      <CurrentTransportStatus>{status}</CurrentTransportStatus>
      <CurrentSpeed>1</CurrentSpeed>
    </u:GetTransportInfoResponse>
  </s:Body>
</s:Envelope>"#
    )
}

pub fn soap_fault(code: u32, description: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>{code}</errorCode>
          <errorDescription>{description}</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#
    )
}

/// Matches requests whose `SOAPACTION` header names `action`.
fn soap_action(action: &str) -> impl wiremock::Match {
    header_regex("SOAPACTION", &format!("#{action}\"?$"))
}

/// Answers `GetTransportInfo` with whatever state the test last set.
#[derive(Clone)]
struct TransportInfoResponder(Arc<Mutex<&'static str>>);

impl Respond for TransportInfoResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let state = *self.0.lock();
        ResponseTemplate::new(200).set_body_string(transport_info(state, "OK"))
    }
}

/// A DLNA renderer backed by a wiremock server.
pub struct FakeRenderer {
    pub server: MockServer,
    pub name: String,
    pub udn: String,
    transport_state: Arc<Mutex<&'static str>>,
}

impl FakeRenderer {
    /// Start a renderer that accepts every command and reports `PLAYING`.
    pub async fn start(name: &str) -> Self {
        let server = MockServer::start().await;
        let udn = format!("uuid:{}", uuid::Uuid::new_v4());
        let transport_state = Arc::new(Mutex::new("PLAYING"));

        Mock::given(method("GET"))
            .and(path("/description.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/xml")
                    .set_body_string(description_xml(name, &udn)),
            )
            .mount(&server)
            .await;

        for action in ["SetAVTransportURI", "Play", "Stop"] {
            Mock::given(method("POST"))
                .and(path(CONTROL_PATH))
                .and(soap_action(action))
                .respond_with(ResponseTemplate::new(200).set_body_string(soap_ok(action)))
                .mount(&server)
                .await;
        }

        Mock::given(method("POST"))
            .and(path(CONTROL_PATH))
            .and(soap_action("GetTransportInfo"))
            .respond_with(TransportInfoResponder(transport_state.clone()))
            .mount(&server)
            .await;

        Self {
            server,
            name: name.to_string(),
            udn,
            transport_state,
        }
    }

    pub fn location(&self) -> String {
        format!("{}/description.xml", self.server.uri())
    }

    pub fn descriptor(&self) -> RendererDescriptor {
        RendererDescriptor {
            id: self.udn.clone(),
            friendly_name: self.name.clone(),
            location: self.location(),
            control_url: format!("{}{}", self.server.uri(), CONTROL_PATH),
            device_type: Some("urn:schemas-upnp-org:device:MediaRenderer:1".into()),
            services: vec![AV_TRANSPORT.to_string()],
            server: None,
        }
    }

    /// Answer `action` with `responder` instead of the default success.
    pub async fn respond_to<R: Respond + 'static>(&self, action: &str, responder: R) {
        Mock::given(method("POST"))
            .and(path(CONTROL_PATH))
            .and(soap_action(action))
            .respond_with(responder)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Change what `GetTransportInfo` reports from now on.
    pub fn set_transport_state(&self, state: &'static str) {
        *self.transport_state.lock() = state;
    }

    /// Bodies of every control request for `action`, in arrival order.
    pub async fn calls(&self, action: &str) -> Vec<String> {
        let suffix = format!("#{action}\"");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|req| {
                req.headers
                    .get("soapaction")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.ends_with(&suffix))
            })
            .map(|req| String::from_utf8_lossy(&req.body).into_owned())
            .collect()
    }
}
