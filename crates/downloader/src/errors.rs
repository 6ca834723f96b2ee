use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid response status for {url}: {status}")]
    ResponseStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Parse m3u8 content failed: {content}")]
    ManifestParse { content: String },
    #[error("Expected a media playlist: {url}")]
    NotMediaPlaylist { url: String },
    #[error("Unsupported encryption method: {method}")]
    UnsupportedEncryption { method: String },
    #[error("Decrypt failed: {reason}")]
    Decrypt { reason: String },
    #[error("Cannot derive a filename from segment uri: {uri}")]
    InvalidSegmentUri { uri: String },
    #[error("No variants found in master playlist")]
    NoVariants,
    #[error("A quality is required for a master playlist")]
    QualityRequired,
    #[error("Segment task failed: {reason}")]
    Task { reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}
