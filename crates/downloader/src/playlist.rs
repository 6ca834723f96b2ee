use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::{MediaPlaylist, Playlist};
use reqwest::header::HeaderMap;
use url::Url;

use crate::errors::DownloaderError;

/// One addressable media segment, as declared by the playlist.
///
/// Identity for delta computation is the `uri`, treated as an opaque,
/// case-sensitive string. The sequence number is only used as the fallback
/// IV for encrypted segments without an explicit one.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub sequence: u64,
    pub key: Option<SegmentKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentKey {
    pub method: KeyMethod,
    pub uri: String,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    Aes128,
    Other(String),
}

impl fmt::Display for KeyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMethod::Aes128 => write!(f, "AES-128"),
            KeyMethod::Other(name) => write!(f, "{name}"),
        }
    }
}

/// The result of one playlist load. Discarded after its delta is computed.
#[derive(Debug, Clone)]
pub struct PlaylistSnapshot {
    /// Segments in declaration order, oldest first.
    pub segments: Vec<Segment>,
    /// Refresh hint in seconds; 0 falls back to the configured interval.
    pub target_duration: u64,
    /// Once true, no further segments will ever be added.
    pub end_list: bool,
}

impl PlaylistSnapshot {
    pub fn refresh_hint(&self) -> Option<Duration> {
        (self.target_duration > 0).then(|| Duration::from_secs(self.target_duration))
    }
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn load(&self) -> Result<PlaylistSnapshot, DownloaderError>;
}

/// Fetches and parses a media playlist over HTTP.
pub struct HttpPlaylistSource {
    client: reqwest::Client,
    url: Url,
    headers: HeaderMap,
}

impl HttpPlaylistSource {
    pub fn new(client: reqwest::Client, url: Url, headers: HeaderMap) -> Self {
        Self {
            client,
            url,
            headers,
        }
    }
}

#[async_trait]
impl PlaylistSource for HttpPlaylistSource {
    async fn load(&self) -> Result<PlaylistSnapshot, DownloaderError> {
        let response = self
            .client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DownloaderError::ResponseStatus {
                url: self.url.to_string(),
                status: response.status(),
            });
        }
        let bytes = response.bytes().await?;
        let (_, playlist) =
            m3u8_rs::parse_playlist(&bytes).map_err(|_| DownloaderError::ManifestParse {
                content: String::from_utf8_lossy(&bytes).into_owned(),
            })?;
        match playlist {
            Playlist::MediaPlaylist(media) => snapshot_from(&media),
            Playlist::MasterPlaylist(_) => Err(DownloaderError::NotMediaPlaylist {
                url: self.url.to_string(),
            }),
        }
    }
}

/// An `EXT-X-KEY` tag applies to every segment after it until the next tag,
/// so the last seen key is carried forward while mapping.
pub(crate) fn snapshot_from(playlist: &MediaPlaylist) -> Result<PlaylistSnapshot, DownloaderError> {
    let mut current_key: Option<SegmentKey> = None;
    let mut segments = Vec::with_capacity(playlist.segments.len());
    for (index, segment) in playlist.segments.iter().enumerate() {
        if let Some(key) = &segment.key {
            current_key = convert_key(key)?;
        }
        segments.push(Segment {
            uri: segment.uri.clone(),
            sequence: playlist.media_sequence + index as u64,
            key: current_key.clone(),
        });
    }
    Ok(PlaylistSnapshot {
        segments,
        target_duration: playlist.target_duration,
        end_list: playlist.end_list,
    })
}

fn convert_key(key: &m3u8_rs::Key) -> Result<Option<SegmentKey>, DownloaderError> {
    let method = match &key.method {
        m3u8_rs::KeyMethod::None => return Ok(None),
        m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
        m3u8_rs::KeyMethod::SampleAES => KeyMethod::Other("SAMPLE-AES".to_string()),
        m3u8_rs::KeyMethod::Other(name) => KeyMethod::Other(name.clone()),
    };
    // Unsupported methods are carried through so the scheduler can reject the
    // run as an encryption failure rather than a parse failure.
    let uri = match (&method, &key.uri) {
        (KeyMethod::Aes128, None) => {
            return Err(DownloaderError::ManifestParse {
                content: "EXT-X-KEY METHOD=AES-128 without URI".to_string(),
            })
        }
        (_, uri) => uri.clone().unwrap_or_default(),
    };
    let iv = match &key.iv {
        Some(raw) => Some(parse_iv(raw)?),
        None => None,
    };
    Ok(Some(SegmentKey { method, uri, iv }))
}

fn parse_iv(raw: &str) -> Result<[u8; 16], DownloaderError> {
    let digits = raw
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u128::from_str_radix(digits, 16)
        .map(u128::to_be_bytes)
        .map_err(|_| DownloaderError::ManifestParse {
            content: format!("invalid EXT-X-KEY IV: {raw}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_snapshot(content: &str) -> PlaylistSnapshot {
        let (_, playlist) = m3u8_rs::parse_media_playlist(content.as_bytes()).unwrap();
        snapshot_from(&playlist).unwrap()
    }

    #[test]
    fn test_plain_playlist_mapping() {
        let snapshot = parse_snapshot(
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXT-X-MEDIA-SEQUENCE:1101811\n\
             #EXTINF:4,\n\
             segment/segment1.ts\n\
             #EXTINF:4,\n\
             segment/segment2.ts\n",
        );

        assert_eq!(snapshot.target_duration, 4);
        assert_eq!(snapshot.refresh_hint(), Some(Duration::from_secs(4)));
        assert!(!snapshot.end_list);
        assert_eq!(snapshot.segments.len(), 2);
        assert_eq!(snapshot.segments[0].uri, "segment/segment1.ts");
        assert_eq!(snapshot.segments[0].sequence, 1101811);
        assert_eq!(snapshot.segments[1].sequence, 1101812);
        assert!(snapshot.segments[0].key.is_none());
    }

    #[test]
    fn test_key_applies_to_following_segments() {
        let snapshot = parse_snapshot(
            "#EXTM3U\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXTINF:4,\n\
             clear.ts\n\
             #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00000000000000000000000000000001\n\
             #EXTINF:4,\n\
             enc1.ts\n\
             #EXTINF:4,\n\
             enc2.ts\n\
             #EXT-X-KEY:METHOD=NONE\n\
             #EXTINF:4,\n\
             clear2.ts\n\
             #EXT-X-ENDLIST\n",
        );

        assert!(snapshot.end_list);
        assert!(snapshot.segments[0].key.is_none());

        let key = snapshot.segments[1].key.as_ref().unwrap();
        assert_eq!(key.method, KeyMethod::Aes128);
        assert_eq!(key.uri, "key.bin");
        let mut iv = [0u8; 16];
        iv[15] = 1;
        assert_eq!(key.iv, Some(iv));

        // Propagated to the next segment, reset by METHOD=NONE.
        assert_eq!(snapshot.segments[2].key, snapshot.segments[1].key);
        assert!(snapshot.segments[3].key.is_none());
    }

    #[test]
    fn test_unsupported_method_is_carried_through() {
        let snapshot = parse_snapshot(
            "#EXTM3U\n\
             #EXT-X-TARGETDURATION:4\n\
             #EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"key.bin\"\n\
             #EXTINF:4,\n\
             enc.ts\n",
        );

        let key = snapshot.segments[0].key.as_ref().unwrap();
        assert_eq!(key.method, KeyMethod::Other("SAMPLE-AES".to_string()));
    }

    #[test]
    fn test_parse_iv() {
        assert_eq!(parse_iv("0x0").unwrap(), [0u8; 16]);
        let mut expected = [0u8; 16];
        expected[14] = 0x01;
        expected[15] = 0x02;
        assert_eq!(parse_iv("0x102").unwrap(), expected);
        assert!(parse_iv("0xnothex").is_err());
    }
}
