pub mod errors;
pub mod fetch;
pub mod key_cache;
pub mod playlist;
pub mod scheduler;
pub mod variant;

// Re-export main types
pub use errors::DownloaderError;
pub use fetch::{HttpSegmentFetcher, SegmentFetch};
pub use key_cache::KeyCache;
pub use playlist::{
    HttpPlaylistSource, KeyMethod, PlaylistSnapshot, PlaylistSource, Segment, SegmentKey,
};
pub use scheduler::{ChunkScheduler, SchedulerOptions};
pub use variant::{choose_stream, AudioTrack, Quality, SelectedStream};
