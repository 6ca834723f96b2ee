use std::str::FromStr;

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, Playlist, VariantStream};
use reqwest::header::HeaderMap;
use url::Url;

use crate::errors::DownloaderError;

/// Quality preference used to pick a variant from a master playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Best,
    Worst,
    /// Highest variant whose bandwidth does not exceed this many bits per second.
    MaxBandwidth(u64),
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Quality::Best),
            "worst" => Ok(Quality::Worst),
            other => other.parse::<u64>().map(Quality::MaxBandwidth).map_err(|_| {
                format!("expected \"best\", \"worst\" or a bandwidth in bits per second, got \"{other}\"")
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub name: String,
    pub language: Option<String>,
    pub url: Url,
}

/// The media playlist to poll, plus any alternate audio renditions that have
/// to be retrieved as additional independent streams.
#[derive(Debug, Clone)]
pub struct SelectedStream {
    pub playlist: Url,
    pub audio: Vec<AudioTrack>,
}

/// Resolves a stream URL to the media playlist to download.
///
/// A media playlist is returned as-is; a master playlist is reduced to one
/// variant by the quality preference.
pub async fn choose_stream(
    client: &reqwest::Client,
    url: &Url,
    headers: &HeaderMap,
    quality: Option<Quality>,
) -> Result<SelectedStream, DownloaderError> {
    let response = client.get(url.clone()).headers(headers.clone()).send().await?;
    if !response.status().is_success() {
        return Err(DownloaderError::ResponseStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }
    let bytes = response.bytes().await?;
    let (_, playlist) =
        m3u8_rs::parse_playlist(&bytes).map_err(|_| DownloaderError::ManifestParse {
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })?;
    match playlist {
        Playlist::MediaPlaylist(_) => Ok(SelectedStream {
            playlist: url.clone(),
            audio: Vec::new(),
        }),
        Playlist::MasterPlaylist(master) => select_variant(&master, url, quality),
    }
}

fn select_variant(
    master: &MasterPlaylist,
    base: &Url,
    quality: Option<Quality>,
) -> Result<SelectedStream, DownloaderError> {
    let quality = quality.ok_or(DownloaderError::QualityRequired)?;

    let chosen = master
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .reduce(|prev, current| pick(prev, current, quality))
        .ok_or(DownloaderError::NoVariants)?;
    let playlist = base.join(&chosen.uri)?;

    let mut audio = Vec::new();
    if let Some(group) = &chosen.audio {
        for media in &master.alternatives {
            if media.media_type != AlternativeMediaType::Audio || &media.group_id != group {
                continue;
            }
            if !(media.autoselect || media.default) {
                continue;
            }
            let Some(uri) = &media.uri else { continue };
            audio.push(AudioTrack {
                name: media.name.clone(),
                language: media.language.clone(),
                url: base.join(uri)?,
            });
        }
    }

    Ok(SelectedStream { playlist, audio })
}

fn pick<'a>(
    prev: &'a VariantStream,
    current: &'a VariantStream,
    quality: Quality,
) -> &'a VariantStream {
    match quality {
        Quality::Best => {
            if prev.bandwidth > current.bandwidth {
                prev
            } else {
                current
            }
        }
        Quality::Worst => {
            if prev.bandwidth > current.bandwidth {
                current
            } else {
                prev
            }
        }
        Quality::MaxBandwidth(limit) => {
            if prev.bandwidth > current.bandwidth || current.bandwidth > limit {
                prev
            } else {
                current
            }
        }
    }
}
