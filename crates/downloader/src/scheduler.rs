use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};

use crate::errors::DownloaderError;
use crate::fetch::SegmentFetch;
use crate::playlist::{KeyMethod, PlaylistSource, Segment};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of segment downloads running at once.
    pub concurrency: usize,
    /// Trailing segments scheduled on the first poll of a live playlist.
    pub backlog: usize,
    /// Time without a new segment before the stream is considered over.
    pub idle_timeout: Duration,
    /// Poll interval used when the playlist carries no target duration.
    pub refresh_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            backlog: 1,
            idle_timeout: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(5),
        }
    }
}

/// Polls a playlist for new segments and downloads them through a bounded
/// worker queue until the stream ends.
///
/// The run resolves exactly once: with success when the playlist completes
/// or goes idle for longer than the timeout, with the first error otherwise.
pub struct ChunkScheduler<P, F> {
    source: P,
    fetcher: Arc<F>,
    options: SchedulerOptions,
}

impl<P, F> ChunkScheduler<P, F>
where
    P: PlaylistSource,
    F: SegmentFetch + 'static,
{
    pub fn new(source: P, fetcher: Arc<F>, options: SchedulerOptions) -> Self {
        Self {
            source,
            fetcher,
            options,
        }
    }

    pub async fn run(self) -> Result<(), DownloaderError> {
        let limiter = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks: JoinSet<Result<(), DownloaderError>> = JoinSet::new();
        let mut last_scheduled: Option<String> = None;
        let mut outcome: Option<Result<(), DownloaderError>> = None;
        let mut polling = true;

        // Three time sources share the loop: the refresh timer, the idle
        // timer, and queue completions. The first poll fires immediately.
        let refresh = sleep(Duration::ZERO);
        tokio::pin!(refresh);
        let idle = sleep(self.options.idle_timeout);
        tokio::pin!(idle);

        loop {
            if !polling && tasks.is_empty() {
                break;
            }

            tokio::select! {
                _ = &mut refresh, if polling => {
                    match self.source.load().await {
                        Ok(snapshot) => {
                            // Re-arm before processing so the poll cadence is
                            // independent of scheduling latency.
                            let interval = snapshot
                                .refresh_hint()
                                .unwrap_or(self.options.refresh_interval);
                            if !snapshot.end_list {
                                refresh.as_mut().reset(Instant::now() + interval);
                            }

                            match compute_delta(
                                &snapshot.segments,
                                last_scheduled.as_deref(),
                                self.options.backlog,
                                snapshot.end_list,
                            ) {
                                Delta::UpToDate => {
                                    log::debug!("No new segments since last check");
                                }
                                Delta::Pending { segments, discontinuity } => {
                                    if discontinuity {
                                        log::warn!(
                                            "Could not find last scheduled segment in playlist, rescheduling the full list"
                                        );
                                    }
                                    if let Some(key) = segments
                                        .iter()
                                        .find_map(|s| s.key.as_ref().filter(|k| k.method != KeyMethod::Aes128))
                                    {
                                        return Err(DownloaderError::UnsupportedEncryption {
                                            method: key.method.to_string(),
                                        });
                                    }
                                    if let Some(last) = segments.last() {
                                        last_scheduled = Some(last.uri.clone());
                                    }
                                    for segment in segments {
                                        log::info!("Queued: {}", segment.uri);
                                        let fetcher = self.fetcher.clone();
                                        let limiter = limiter.clone();
                                        let segment = segment.clone();
                                        tasks.spawn(async move {
                                            let _permit = limiter
                                                .acquire_owned()
                                                .await
                                                .expect("semaphore closed");
                                            fetcher.fetch(&segment).await
                                        });
                                    }
                                    if !snapshot.end_list {
                                        idle.as_mut()
                                            .reset(Instant::now() + self.options.idle_timeout);
                                    }
                                }
                            }

                            if snapshot.end_list {
                                log::debug!("Playlist is complete, waiting for remaining downloads");
                                polling = false;
                            }
                        }
                        Err(e) => {
                            log::error!("Playlist refresh failed: {e}");
                            outcome.get_or_insert(Err(e));
                            polling = false;
                        }
                    }
                }
                _ = &mut idle, if polling => {
                    log::info!(
                        "No new segment for {:?}, stopping",
                        self.options.idle_timeout
                    );
                    outcome.get_or_insert(Ok(()));
                    polling = false;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::error!("Segment download failed: {e}");
                            outcome.get_or_insert(Err(e));
                            polling = false;
                        }
                        Err(e) => {
                            log::error!("Segment task aborted: {e}");
                            outcome.get_or_insert(Err(DownloaderError::Task {
                                reason: e.to_string(),
                            }));
                            polling = false;
                        }
                    }
                }
            }
        }

        outcome.unwrap_or(Ok(()))
    }
}

enum Delta<'a> {
    /// The last scheduled segment is still the newest entry.
    UpToDate,
    Pending {
        segments: &'a [Segment],
        discontinuity: bool,
    },
}

fn compute_delta<'a>(
    segments: &'a [Segment],
    last_scheduled: Option<&str>,
    backlog: usize,
    end_list: bool,
) -> Delta<'a> {
    let Some(last) = last_scheduled else {
        // First load: a complete playlist is backfilled entirely, a live one
        // only from the trailing backlog.
        if end_list {
            return Delta::Pending {
                segments,
                discontinuity: false,
            };
        }
        let start = segments.len().saturating_sub(backlog);
        return Delta::Pending {
            segments: &segments[start..],
            discontinuity: false,
        };
    };
    match segments.iter().position(|s| s.uri == last) {
        None => Delta::Pending {
            segments,
            discontinuity: true,
        },
        Some(index) if index + 1 == segments.len() => Delta::UpToDate,
        Some(index) => Delta::Pending {
            segments: &segments[index + 1..],
            discontinuity: false,
        },
    }
}
