use std::path::{Path, PathBuf};

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::{block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, KeyIvInit};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::errors::DownloaderError;
use crate::key_cache::KeyCache;
use crate::playlist::{KeyMethod, Segment, SegmentKey};

const BLOCK: usize = 16;

#[async_trait]
pub trait SegmentFetch: Send + Sync {
    async fn fetch(&self, segment: &Segment) -> Result<(), DownloaderError>;
}

/// Downloads one segment per call, streaming the body straight to disk with
/// an optional AES-128-CBC decrypt stage in between.
///
/// The destination filename is the final path segment of the resolved URL,
/// so re-running against the same playlist overwrites instead of duplicating.
pub struct HttpSegmentFetcher {
    client: reqwest::Client,
    base: Url,
    headers: HeaderMap,
    segment_dir: PathBuf,
    keys: KeyCache,
}

impl HttpSegmentFetcher {
    pub fn new(client: reqwest::Client, base: Url, headers: HeaderMap, segment_dir: PathBuf) -> Self {
        Self {
            client,
            base,
            headers,
            segment_dir,
            keys: KeyCache::new(),
        }
    }

    async fn get_bytes(&self, url: Url) -> Result<Bytes, DownloaderError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DownloaderError::ResponseStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn key_bytes(&self, key_url: &Url) -> Result<Bytes, DownloaderError> {
        if let Some(cached) = self.keys.get(key_url.as_str()).await {
            return Ok(cached);
        }
        let bytes = self.get_bytes(key_url.clone()).await?;
        self.keys.put(key_url.as_str(), bytes.clone()).await;
        Ok(bytes)
    }

    async fn decryptor_for(
        &self,
        key: &SegmentKey,
        sequence: u64,
    ) -> Result<CbcDecryptor, DownloaderError> {
        if key.method != KeyMethod::Aes128 {
            return Err(DownloaderError::UnsupportedEncryption {
                method: key.method.to_string(),
            });
        }
        let key_url = self.base.join(&key.uri)?;
        let bytes = self.key_bytes(&key_url).await?;
        let key_bytes: [u8; BLOCK] =
            bytes
                .as_ref()
                .try_into()
                .map_err(|_| DownloaderError::Decrypt {
                    reason: format!("expected a 16 byte key, got {} bytes", bytes.len()),
                })?;
        // RFC 8216: without an explicit IV, the media sequence number is the IV.
        let iv = key.iv.unwrap_or_else(|| u128::from(sequence).to_be_bytes());
        Ok(CbcDecryptor::new(&key_bytes, &iv))
    }

    async fn download(
        &self,
        url: Url,
        path: &Path,
        mut decryptor: Option<CbcDecryptor>,
    ) -> Result<(), DownloaderError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            log::warn!("Download segment failed: {url}: {}", response.status());
            return Err(DownloaderError::ResponseStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let mut file = File::create(path).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            match decryptor.as_mut() {
                Some(stage) => {
                    let plain = stage.update(&chunk);
                    if !plain.is_empty() {
                        file.write_all(&plain).await?;
                    }
                }
                None => file.write_all(&chunk).await?,
            }
        }
        if let Some(stage) = decryptor {
            file.write_all(&stage.finish()?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SegmentFetch for HttpSegmentFetcher {
    async fn fetch(&self, segment: &Segment) -> Result<(), DownloaderError> {
        let url = self.base.join(&segment.uri)?;
        let file_name =
            segment_file_name(&url).ok_or_else(|| DownloaderError::InvalidSegmentUri {
                uri: segment.uri.clone(),
            })?;
        let path = self.segment_dir.join(file_name);

        let decryptor = match &segment.key {
            Some(key) => Some(self.decryptor_for(key, segment.sequence).await?),
            None => None,
        };
        self.download(url.clone(), &path, decryptor).await?;
        log::info!("Received: {url}");
        Ok(())
    }
}

/// Filename from the final path segment of the resolved URL, query excluded.
fn segment_file_name(url: &Url) -> Option<&str> {
    url.path_segments()
        .and_then(|mut parts| parts.next_back())
        .filter(|name| !name.is_empty())
}

/// Incremental AES-128-CBC decryption.
///
/// Complete blocks are decrypted as they arrive; the final block is held
/// back until `finish` so the PKCS#7 padding can be stripped. At most two
/// blocks of ciphertext are ever buffered.
pub(crate) struct CbcDecryptor {
    cipher: cbc::Decryptor<Aes128>,
    carry: Vec<u8>,
}

impl CbcDecryptor {
    pub(crate) fn new(key: &[u8; BLOCK], iv: &[u8; BLOCK]) -> Self {
        Self {
            cipher: cbc::Decryptor::<Aes128>::new(key.into(), iv.into()),
            carry: Vec::new(),
        }
    }

    pub(crate) fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(input);
        let take = self.carry.len().saturating_sub(BLOCK) / BLOCK * BLOCK;
        if take == 0 {
            return Vec::new();
        }
        let mut out: Vec<u8> = self.carry.drain(..take).collect();
        for block in out.chunks_exact_mut(BLOCK) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>, DownloaderError> {
        if self.carry.is_empty() {
            return Ok(Vec::new());
        }
        if self.carry.len() != BLOCK {
            return Err(DownloaderError::Decrypt {
                reason: format!("ciphertext length is not a multiple of {BLOCK} bytes"),
            });
        }
        let mut block = self.carry;
        let plain = self
            .cipher
            .decrypt_padded_mut::<Pkcs7>(&mut block)
            .map_err(|_| DownloaderError::Decrypt {
                reason: "invalid PKCS#7 padding".to_string(),
            })?;
        Ok(plain.to_vec())
    }
}
