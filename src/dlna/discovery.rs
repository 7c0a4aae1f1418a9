//! SSDP discovery of media renderers.

use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Url;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use super::description::parse_description;
use super::ssdp::{build_search, parse_response, SsdpResponse};
use super::RendererDescriptor;
use crate::config::DiscoveryConfig;
use crate::{Error, Result};

/// Description fetches in flight at once.
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Finds renderers with an M-SEARCH burst and resolves their descriptions.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    http: reqwest::Client,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.description_timeout())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// Scan for `timeout` and return every renderer that resolved.
    ///
    /// No responders is an empty result, not an error.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<RendererDescriptor>> {
        self.scan_with(timeout, |_| {}).await
    }

    /// Like [`scan`](Self::scan), but fails with [`Error::DiscoveryTimeout`]
    /// when nothing answered.
    pub async fn scan_nonempty(&self, timeout: Duration) -> Result<Vec<RendererDescriptor>> {
        let renderers = self.scan(timeout).await?;
        if renderers.is_empty() {
            return Err(Error::DiscoveryTimeout(timeout));
        }
        Ok(renderers)
    }

    /// Scan, calling `on_found` for each renderer as soon as its description
    /// resolves.
    ///
    /// Descriptions are fetched while the search is still listening, and the
    /// whole scan ends at `timeout`: fetches still in flight then are
    /// abandoned. A later response announcing a new location for a known
    /// device re-resolves it and replaces the earlier entry.
    ///
    /// Responders whose description is unreachable or unparsable are dropped
    /// with a warning; the rest of the scan continues.
    pub async fn scan_with<F>(
        &self,
        timeout: Duration,
        mut on_found: F,
    ) -> Result<Vec<RendererDescriptor>>
    where
        F: FnMut(&RendererDescriptor),
    {
        let deadline = Instant::now() + timeout;
        let socket = self.search().await?;

        let mut locations: HashMap<String, String> = HashMap::new();
        let mut queued: VecDeque<(String, SsdpResponse)> = VecDeque::new();
        let mut fetches = FuturesUnordered::new();
        let mut renderers: Vec<RendererDescriptor> = Vec::new();
        let mut buf = vec![0u8; 8192];

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            while fetches.len() < MAX_CONCURRENT_FETCHES {
                let Some((key, response)) = queued.pop_front() else {
                    break;
                };
                fetches.push(self.fetch(key, response));
            }

            tokio::select! {
                _ = &mut expired => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::debug!("SSDP receive failed: {}", e);
                            continue;
                        }
                    };
                    let datagram = String::from_utf8_lossy(&buf[..len]);
                    let response = match parse_response(&datagram, from) {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::debug!("Ignoring datagram from {}: {}", from, e);
                            continue;
                        }
                    };
                    let key = response.device_key();
                    tracing::debug!(
                        device = %key,
                        location = %response.location,
                        "SSDP response from {}",
                        from
                    );
                    if locations.get(&key) == Some(&response.location) {
                        continue;
                    }
                    locations.insert(key.clone(), response.location.clone());
                    queued.push_back((key, response));
                }
                Some((key, response, result)) = fetches.next(), if !fetches.is_empty() => {
                    // Superseded by a newer location for the same device.
                    if locations.get(&key) != Some(&response.location) {
                        continue;
                    }
                    match result {
                        Ok(renderer) => {
                            // A device without USN can still collide on its UDN.
                            if let Some(existing) =
                                renderers.iter_mut().find(|r| r.id == renderer.id)
                            {
                                *existing = renderer;
                                continue;
                            }
                            tracing::info!(
                                device = %renderer.friendly_name,
                                id = %renderer.id,
                                "Found renderer"
                            );
                            on_found(&renderer);
                            renderers.push(renderer);
                        }
                        Err(e) => {
                            tracing::warn!(
                                location = %response.location,
                                "Dropping device: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let abandoned = fetches.len() + queued.len();
        if abandoned > 0 {
            tracing::debug!("Scan deadline reached with {} descriptions unresolved", abandoned);
        }
        Ok(renderers)
    }

    /// Open a socket and send the M-SEARCH burst, one request per target.
    async fn search(&self) -> Result<UdpSocket> {
        let target: SocketAddr = self.config.multicast_addr.parse().map_err(|_| {
            Error::Config(format!(
                "Invalid discovery address: {}",
                self.config.multicast_addr
            ))
        })?;

        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        if target.ip().is_multicast() {
            if let Err(e) = socket.set_multicast_ttl_v4(2) {
                tracing::debug!("Could not set multicast TTL: {}", e);
            }
        }

        let host = self.config.multicast_addr.as_str();
        for st in &self.config.search_targets {
            let request = build_search(host, st, self.config.mx);
            socket.send_to(request.as_bytes(), target).await?;
            tracing::debug!(st = %st, "Sent M-SEARCH to {}", target);
        }

        Ok(socket)
    }

    async fn fetch(
        &self,
        key: String,
        response: SsdpResponse,
    ) -> (String, SsdpResponse, Result<RendererDescriptor>) {
        let result = self.resolve(&response).await;
        (key, response, result)
    }

    async fn resolve(&self, response: &SsdpResponse) -> Result<RendererDescriptor> {
        let location = Url::parse(&response.location)
            .map_err(|e| Error::malformed(&response.location, e.to_string()))?;

        let body = self
            .http
            .get(location.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::unreachable(response.location.clone(), e))?
            .text()
            .await
            .map_err(|e| Error::unreachable(response.location.clone(), e))?;

        let description = parse_description(&body, &location)?;
        let id = response
            .usn
            .as_deref()
            .and_then(super::ssdp::device_id)
            .or_else(|| description.udn.clone())
            .unwrap_or_else(|| response.location.clone());

        Ok(RendererDescriptor {
            id,
            friendly_name: description.friendly_name,
            location: response.location.clone(),
            control_url: description.control_url,
            device_type: description.device_type,
            services: description.services,
            server: response.server.clone(),
        })
    }
}
