//! SOAP envelopes for the AVTransport service.

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// AVTransport service type.
pub const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// `UPnPError` detail carried in a SOAP fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpnpFault {
    pub code: u32,
    pub description: String,
}

/// Build the envelope for `action` with `InstanceID` 0 followed by `args`.
///
/// Argument values are escaped here.
pub fn envelope(action: &str, args: &[(&str, &str)]) -> String {
    let mut body = String::from("<InstanceID>0</InstanceID>");
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", xml_escape(value)));
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:{action} xmlns:u="{service}">{body}</u:{action}></s:Body>"#,
            r#"</s:Envelope>"#
        ),
        action = action,
        service = AV_TRANSPORT,
        body = body,
    )
}

/// Value of the `SOAPACTION` header for `action`.
pub fn soap_action(action: &str) -> String {
    format!("\"{AV_TRANSPORT}#{action}\"")
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Compiled element patterns, keyed by tag name.
static TAG_PATTERNS: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);

fn tag_pattern(tag: &str) -> Option<Regex> {
    if let Some(re) = TAG_PATTERNS.get(tag) {
        return Some(re.clone());
    }
    let pattern = format!(
        r"(?s)<(?:[\w.-]+:)?{tag}(?:\s[^>]*)?>(.*?)</(?:[\w.-]+:)?{tag}\s*>",
        tag = regex::escape(tag)
    );
    let re = Regex::new(&pattern).ok()?;
    TAG_PATTERNS.insert(tag.to_string(), re.clone());
    Some(re)
}

/// Text content of the first `<tag>` element, namespace prefix ignored.
pub fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    tag_pattern(tag)?
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| xml_unescape(m.as_str().trim()))
}

/// Parse a `UPnPError` out of a fault response body.
pub fn parse_fault(xml: &str) -> Option<UpnpFault> {
    let code = extract_tag(xml, "errorCode")?.parse().ok()?;
    let description = extract_tag(xml, "errorDescription").unwrap_or_default();
    Some(UpnpFault { code, description })
}
