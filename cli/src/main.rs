mod ffmpeg;
mod merge;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use downloader::{
    choose_stream, ChunkScheduler, HttpPlaylistSource, HttpSegmentFetcher, Quality,
    SchedulerOptions,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "hlsdl", version, about = "Download HLS (m3u8) video streams")]
struct Args {
    /// URL of the m3u8 playlist, master or media
    url: Url,

    /// Output file (mp4)
    #[arg(short, long)]
    output: PathBuf,

    /// Variant to pick from a master playlist: "best", "worst" or a bandwidth ceiling
    #[arg(short, long, default_value = "best")]
    quality: Quality,

    /// Maximum number of parallel segment downloads
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Trailing segments to pick up on the first poll of a live stream
    #[arg(long, default_value_t = 1)]
    from_end: usize,

    /// Seconds without a new segment before the stream is considered over
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Fallback playlist refresh interval in seconds
    #[arg(long, default_value_t = 5)]
    refresh_interval: u64,

    /// Keep segments in this directory instead of a temporary one
    #[arg(long)]
    segments_dir: Option<PathBuf>,

    /// Extra HTTP header, "Name: Value" (repeatable)
    #[arg(long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Merge segments with the ffmpeg concat demuxer instead of raw concatenation
    #[arg(long)]
    ffmpeg_merge: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();
    if let Err(e) = run(args).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let headers = parse_headers(&args.headers)?;
    let client = reqwest::Client::new();

    let temp_dir = match &args.segments_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir()
            .join("hls-downloader")
            .join(chrono::Utc::now().timestamp_millis().to_string()),
    };
    tokio::fs::create_dir_all(&temp_dir).await?;

    let stream = choose_stream(&client, &args.url, &headers, Some(args.quality)).await?;
    let mut playlists = vec![stream.playlist.clone()];
    for track in &stream.audio {
        log::info!(
            "Picked up audio rendition: {} ({})",
            track.name,
            track.language.as_deref().unwrap_or("und")
        );
        playlists.push(track.url.clone());
    }

    let options = SchedulerOptions {
        concurrency: args.concurrency,
        backlog: args.from_end,
        idle_timeout: Duration::from_secs(args.timeout),
        refresh_interval: Duration::from_secs(args.refresh_interval),
    };

    // One scheduler per stream, each with its own numbered directory.
    let mut downloads = Vec::new();
    let mut stream_dirs = Vec::new();
    for (index, playlist) in playlists.iter().enumerate() {
        let dir = temp_dir.join(index.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let source = HttpPlaylistSource::new(client.clone(), playlist.clone(), headers.clone());
        let fetcher = Arc::new(HttpSegmentFetcher::new(
            client.clone(),
            playlist.clone(),
            headers.clone(),
            dir.clone(),
        ));
        downloads.push(ChunkScheduler::new(source, fetcher, options.clone()).run());
        stream_dirs.push(dir);
    }
    futures::future::try_join_all(downloads).await?;

    // Merge each stream's segments in filename order; completion order of
    // the downloads is not meaningful.
    let mut merged = Vec::new();
    for (index, dir) in stream_dirs.iter().enumerate() {
        let segments = sorted_segments(dir).await?;
        let intermediate = temp_dir.join(format!("{index}.ts"));
        if args.ffmpeg_merge {
            ffmpeg::merge_segments(&segments, &intermediate).await?;
        } else {
            merge::concat_files(&segments, &intermediate).await?;
        }
        merged.push(intermediate);
    }

    ffmpeg::transmux_to_mp4(&merged, &args.output).await?;

    tokio::fs::remove_dir_all(&temp_dir).await?;
    log::info!("Saved: {}", args.output.display());
    Ok(())
}

async fn sorted_segments(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn Error>> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("invalid header (expected \"Name: Value\"): {line}"))?;
        headers.insert(
            name.trim().parse::<HeaderName>()?,
            value.trim().parse::<HeaderValue>()?,
        );
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Referer: https://example.com/live".to_string(),
            "X-Token:  abc123".to_string(),
        ])
        .unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["referer"], "https://example.com/live");
        assert_eq!(headers["x-token"], "abc123");
    }

    #[test]
    fn test_parse_headers_rejects_missing_colon() {
        assert!(parse_headers(&["not-a-header".to_string()]).is_err());
    }
}
