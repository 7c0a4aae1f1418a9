//! DIDL-Lite metadata sent with `SetAVTransportURI`.

use super::soap::xml_escape;

pub const DEFAULT_TITLE: &str = "Screen Share";

/// Metadata describing the live stream as a single video item.
///
/// The result is raw XML; the SOAP layer escapes it again when it becomes
/// the `CurrentURIMetaData` argument.
pub fn video_item(url: &str, mime_type: &str, title: &str) -> String {
    format!(
        concat!(
            r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
            r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#,
            r#"<item id="0" parentID="-1" restricted="1">"#,
            r#"<dc:title>{title}</dc:title>"#,
            r#"<upnp:class>object.item.videoItem</upnp:class>"#,
            r#"<res protocolInfo="http-get:*:{mime}:*">{url}</res>"#,
            r#"</item></DIDL-Lite>"#
        ),
        title = xml_escape(title),
        mime = mime_type,
        url = xml_escape(url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_item_metadata() {
        let didl = video_item("http://10.0.0.2:5000/stream.ts", "video/mp2t", DEFAULT_TITLE);
        assert!(didl.contains("<dc:title>Screen Share</dc:title>"));
        assert!(didl.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(didl.contains(
            r#"<res protocolInfo="http-get:*:video/mp2t:*">http://10.0.0.2:5000/stream.ts</res>"#
        ));
    }
}
