//! Device description parsing.
//!
//! Descriptions are small and vendor XML is often sloppy about namespaces,
//! so fields are pulled out with [`extract_tag`] rather than a full parser.

use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

use super::soap::{extract_tag, AV_TRANSPORT};
use crate::{Error, Result};

/// Fields taken from a device description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescription {
    pub friendly_name: String,
    pub udn: Option<String>,
    pub device_type: Option<String>,
    pub services: Vec<String>,
    /// Absolute AVTransport control URL.
    pub control_url: String,
}

/// One `<service>` element of the service list.
static SERVICE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[\w.-]+:)?service(?:\s[^>]*)?>(.*?)</(?:[\w.-]+:)?service\s*>")
        .expect("service regex is a constant and always valid")
});

/// Parse a description fetched from `location`.
///
/// Relative control URLs resolve against `URLBase` when present, else against
/// the location. A device without an AVTransport service cannot be cast to and
/// is reported as [`Error::ProtocolMalformed`].
pub fn parse_description(xml: &str, location: &Url) -> Result<DeviceDescription> {
    if !xml.contains("<root") && !xml.contains(":root") {
        return Err(Error::malformed(location, "not a device description"));
    }

    let base = extract_tag(xml, "URLBase")
        .and_then(|base| Url::parse(&base).ok())
        .unwrap_or_else(|| location.clone());

    let friendly_name = extract_tag(xml, "friendlyName")
        .filter(|name| !name.is_empty())
        .or_else(|| extract_tag(xml, "modelName").filter(|name| !name.is_empty()))
        .unwrap_or_else(|| format!("Device at {}", location.host_str().unwrap_or("unknown")));

    let mut services = Vec::new();
    let mut control_url = None;
    for caps in SERVICE_BLOCK.captures_iter(xml) {
        let block = &caps[1];
        let Some(service_type) = extract_tag(block, "serviceType") else {
            continue;
        };
        let is_av_transport = service_type.starts_with(AV_TRANSPORT.trim_end_matches(":1"));
        if control_url.is_none() && is_av_transport {
            if let Some(path) = extract_tag(block, "controlURL") {
                let resolved = base.join(&path).map_err(|e| {
                    Error::malformed(location, format!("invalid controlURL {path:?}: {e}"))
                })?;
                control_url = Some(resolved.to_string());
            }
        }
        services.push(service_type);
    }

    let control_url = control_url
        .ok_or_else(|| Error::malformed(location, "no AVTransport service advertised"))?;

    Ok(DeviceDescription {
        friendly_name,
        udn: extract_tag(xml, "UDN"),
        device_type: extract_tag(xml, "deviceType"),
        services,
        control_url,
    })
}
