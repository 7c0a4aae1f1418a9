//! Live HLS playlist rendering and parsing.

use std::fmt::Write;

use super::store::Segment;

/// One entry of the live playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub sequence: u64,
    pub duration_secs: f64,
}

impl ManifestEntry {
    /// Reference relative to the playlist URL.
    pub fn uri(&self) -> String {
        segment_uri(self.sequence)
    }
}

/// Immutable snapshot of the live window.
///
/// The store swaps in a new snapshot on every publish, so a reader holds
/// either the old or the new manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Integer upper bound of every segment duration.
    pub target_duration: u32,
    /// Sequence number of the first entry.
    pub media_sequence: u64,
    pub entries: Vec<ManifestEntry>,
}

pub fn segment_uri(sequence: u64) -> String {
    format!("segments/{sequence}.ts")
}

impl Manifest {
    /// Manifest with no segments; `next_sequence` is what the first entry
    /// will carry.
    pub fn empty(next_sequence: u64) -> Self {
        Self {
            target_duration: 1,
            media_sequence: next_sequence,
            entries: Vec::new(),
        }
    }

    /// Build from the retained segments, oldest first.
    pub fn from_segments<'a>(
        segments: impl IntoIterator<Item = &'a Segment>,
        next_sequence: u64,
    ) -> Self {
        let entries: Vec<ManifestEntry> = segments
            .into_iter()
            .map(|s| ManifestEntry {
                sequence: s.sequence,
                duration_secs: s.duration_secs,
            })
            .collect();

        let Some(first) = entries.first() else {
            return Self::empty(next_sequence);
        };

        let longest = entries
            .iter()
            .map(|e| e.duration_secs)
            .fold(0.0_f64, f64::max);

        Self {
            target_duration: (longest.ceil() as u32).max(1),
            media_sequence: first.sequence,
            entries,
        }
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.duration_secs).sum()
    }

    /// Render as an `#EXTM3U` live playlist (no `#EXT-X-ENDLIST`).
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(128 + self.entries.len() * 48);

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:6").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();
        writeln!(out, "#EXT-X-INDEPENDENT-SEGMENTS").unwrap();

        for entry in &self.entries {
            writeln!(out, "#EXTINF:{:.6},", entry.duration_secs).unwrap();
            writeln!(out, "{}", entry.uri()).unwrap();
        }

        out
    }
}

/// A media playlist as written by an external segmenter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPlaylist {
    pub media_sequence: u64,
    /// `(duration, uri)` in playlist order.
    pub entries: Vec<(f64, String)>,
}

impl ParsedPlaylist {
    /// Iterate entries paired with their media sequence numbers.
    pub fn numbered(&self) -> impl Iterator<Item = (u64, f64, &str)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, (duration, uri))| (self.media_sequence + i as u64, *duration, uri.as_str()))
    }
}

/// Parse a media playlist. Unknown tags are ignored; an `#EXTINF` without a
/// following URI is dropped.
pub fn parse_media_playlist(text: &str) -> ParsedPlaylist {
    let mut playlist = ParsedPlaylist::default();
    let mut pending_duration: Option<f64> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or("").trim();
            pending_duration = duration.parse().ok();
        } else if line.starts_with('#') {
            continue;
        } else if let Some(duration) = pending_duration.take() {
            playlist.entries.push((duration, line.to_string()));
        }
    }

    playlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn segment(sequence: u64, duration_secs: f64) -> Segment {
        Segment {
            sequence,
            duration_secs,
            data: Bytes::from_static(b"ts"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn render_live_playlist() {
        let segments = [segment(7, 0.5), segment(8, 0.5), segment(9, 0.466667)];
        let manifest = Manifest::from_segments(&segments, 10);
        let m3u8 = manifest.render();

        assert_eq!(
            m3u8,
            "#EXTM3U\n\
             #EXT-X-VERSION:6\n\
             #EXT-X-TARGETDURATION:1\n\
             #EXT-X-MEDIA-SEQUENCE:7\n\
             #EXT-X-INDEPENDENT-SEGMENTS\n\
             #EXTINF:0.500000,\n\
             segments/7.ts\n\
             #EXTINF:0.500000,\n\
             segments/8.ts\n\
             #EXTINF:0.466667,\n\
             segments/9.ts\n"
        );
        assert!(!m3u8.contains("ENDLIST"));
    }

    #[test]
    fn empty_manifest_points_at_next_sequence() {
        let manifest = Manifest::from_segments(&[], 12);
        assert_eq!(manifest.media_sequence, 12);
        assert!(manifest.entries.is_empty());
        assert!(manifest.render().contains("#EXT-X-MEDIA-SEQUENCE:12\n"));
    }

    #[test]
    fn target_duration_rounds_up() {
        let segments = [segment(0, 0.5), segment(1, 1.2)];
        assert_eq!(Manifest::from_segments(&segments, 2).target_duration, 2);
    }

    #[test]
    fn parse_segmenter_playlist() {
        let text = "#EXTM3U\n\
            #EXT-X-VERSION:6\n\
            #EXT-X-TARGETDURATION:1\n\
            #EXT-X-MEDIA-SEQUENCE:3\n\
            #EXT-X-INDEPENDENT-SEGMENTS\n\
            #EXTINF:0.500000,\n\
            segment_00003.ts\n\
            #EXTINF:0.533333,\n\
            segment_00004.ts\n";
        let playlist = parse_media_playlist(text);

        assert_eq!(playlist.media_sequence, 3);
        let numbered: Vec<_> = playlist.numbered().collect();
        assert_eq!(
            numbered,
            vec![(3, 0.5, "segment_00003.ts"), (4, 0.533333, "segment_00004.ts")]
        );
    }

    #[test]
    fn parse_tolerates_partial_write() {
        let text = "#EXTM3U\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:0.500000,\n";
        let playlist = parse_media_playlist(text);
        assert!(playlist.entries.is_empty());
    }
}
