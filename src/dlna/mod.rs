//! DLNA renderer discovery and control.
//!
//! Discovery is an SSDP M-SEARCH burst followed by an HTTP fetch of each
//! responder's device description. Control is SOAP over HTTP against the
//! AVTransport service advertised in that description.
//!
//! # Layout
//!
//! - [`ssdp`] - M-SEARCH request building and response parsing
//! - [`description`] - device description XML parsing
//! - [`discovery`] - the scan itself ([`DiscoveryClient`])
//! - [`soap`] - envelopes, escaping, fault parsing
//! - [`didl`] - DIDL-Lite metadata for `SetAVTransportURI`
//! - [`control`] - AVTransport commands ([`ControlClient`])

pub mod control;
pub mod description;
pub mod didl;
pub mod discovery;
pub mod soap;
pub mod ssdp;

pub use control::{ControlClient, TransportState};
pub use discovery::DiscoveryClient;
pub use soap::UpnpFault;

use serde::{Deserialize, Serialize};

/// A renderer found by one discovery scan.
///
/// Descriptors are not cached between scans; every scan returns a fresh set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererDescriptor {
    /// `uuid:...` device identifier.
    pub id: String,
    pub friendly_name: String,
    /// Device description URL from the SSDP response.
    pub location: String,
    /// Absolute AVTransport control URL.
    pub control_url: String,
    pub device_type: Option<String>,
    /// Every `serviceType` the device advertises.
    pub services: Vec<String>,
    /// SSDP `SERVER` header, if sent.
    pub server: Option<String>,
}

impl RendererDescriptor {
    /// Host part of the description location.
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.location)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// Whether this renderer matches a user-supplied name, uuid or 1-based
    /// list index. `position` is this renderer's 0-based place in the list.
    pub fn matches(&self, selector: &str, position: usize) -> bool {
        if let Ok(index) = selector.parse::<usize>() {
            return index == position + 1;
        }
        let selector = selector.to_lowercase();
        self.id.to_lowercase() == selector
            || self.id.to_lowercase().trim_start_matches("uuid:") == selector
            || self.friendly_name.to_lowercase().contains(&selector)
    }
}
