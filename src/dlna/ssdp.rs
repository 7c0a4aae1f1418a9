//! SSDP M-SEARCH requests and responses.

use crate::{Error, Result};

/// Build an M-SEARCH request for `target`.
pub fn build_search(host: &str, target: &str, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {host}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {target}\r\n\
         \r\n"
    )
}

/// Headers of interest from one search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpResponse {
    pub location: String,
    pub usn: Option<String>,
    pub st: Option<String>,
    pub server: Option<String>,
}

impl SsdpResponse {
    /// Device identifier: the `uuid:` part of USN, else the location.
    pub fn device_key(&self) -> String {
        self.usn
            .as_deref()
            .and_then(device_id)
            .unwrap_or_else(|| self.location.clone())
    }
}

/// Parse a unicast search response. Header names are case-insensitive.
pub fn parse_response(datagram: &str, origin: impl std::fmt::Display) -> Result<SsdpResponse> {
    let mut lines = datagram.lines();
    let status = lines.next().unwrap_or_default();
    if !status.starts_with("HTTP/")
        || !status.split_whitespace().nth(1).is_some_and(|c| c == "200")
    {
        return Err(Error::malformed(
            &origin,
            format!("unexpected status line {status:?}"),
        ));
    }

    let mut location = None;
    let mut usn = None;
    let mut st = None;
    let mut server = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match name.trim().to_ascii_uppercase().as_str() {
            "LOCATION" => location = Some(value.to_string()),
            "USN" => usn = Some(value.to_string()),
            "ST" => st = Some(value.to_string()),
            "SERVER" => server = Some(value.to_string()),
            _ => {}
        }
    }

    let location =
        location.ok_or_else(|| Error::malformed(&origin, "response has no LOCATION header"))?;
    if reqwest::Url::parse(&location).is_err() {
        return Err(Error::malformed(
            &origin,
            format!("invalid LOCATION {location:?}"),
        ));
    }

    Ok(SsdpResponse {
        location,
        usn,
        st,
        server,
    })
}

/// Extract `uuid:...` from a USN such as `uuid:abc::urn:schemas-upnp-org:device:MediaRenderer:1`.
pub fn device_id(usn: &str) -> Option<String> {
    let id = usn.split("::").next()?.trim();
    if id.to_ascii_lowercase().starts_with("uuid:") && id.len() > 5 {
        Some(id.to_string())
    } else {
        None
    }
}
