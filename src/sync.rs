//! Background task keeping the directory in step with the tailnet.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::{Directory, DirectoryStore};
use crate::error::SourceError;
use crate::membership::{Member, MemberStream, MembershipSource};
use crate::metrics::{self, SyncEventType};

/// Pulls membership from a source and publishes it into a store.
pub struct Synchronizer {
    source: Arc<dyn MembershipSource>,
    store: DirectoryStore,
    zone: String,
    refresh_interval: Duration,
    reconnect_backoff: Duration,
}

impl Synchronizer {
    /// Create a synchronizer for `zone`.
    pub fn new(
        source: Arc<dyn MembershipSource>,
        store: DirectoryStore,
        zone: impl Into<String>,
        refresh_interval: Duration,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            source,
            store,
            zone: zone.into(),
            refresh_interval,
            reconnect_backoff,
        }
    }

    /// Poll the source once and publish the result.
    ///
    /// On failure the store keeps its current snapshot.
    pub async fn refresh_once(&self) -> Result<bool, SourceError> {
        let members = self.source.poll().await?;
        Ok(self.apply(&members))
    }

    fn apply(&self, members: &[Member]) -> bool {
        let directory = Directory::from_members(&self.zone, members);
        debug!(
            members = members.len(),
            entries = directory.len(),
            "derived directory from membership"
        );
        self.store.publish(directory)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Source failures never end the loop. The store keeps serving its last
    /// good snapshot. Whenever the watch stream is unavailable or drops, the
    /// source is polled once and the watch is retried after the poll delay.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(zone = %self.zone, "starting membership sync");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let delay = match self.source.watch().await {
                Ok(Some(stream)) => {
                    metrics::record_sync_event(SyncEventType::WatchConnected);
                    if !self.consume(stream, &shutdown).await {
                        break;
                    }
                    self.poll_cycle().await
                }
                Ok(None) => self.poll_cycle().await,
                Err(e) => {
                    warn!(error = %e, "unable to watch membership source, polling");
                    metrics::record_source_error(&e);
                    self.poll_cycle().await
                }
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("membership sync stopped");
    }

    /// One poll. Returns how long to wait before the next one.
    async fn poll_cycle(&self) -> Duration {
        match self.refresh_once().await {
            Ok(changed) => {
                metrics::record_sync_event(SyncEventType::Poll);
                debug!(changed, "membership poll complete");
                self.refresh_interval
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in = ?self.reconnect_backoff,
                    "membership poll failed, keeping last directory"
                );
                metrics::record_source_error(&e);
                self.reconnect_backoff
            }
        }
    }

    /// Publish every snapshot from a watch stream.
    ///
    /// Returns `false` if shutdown was requested, `true` if the stream failed
    /// or ended and should be reopened.
    async fn consume(&self, mut stream: MemberStream, shutdown: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return false,

                item = stream.next() => match item {
                    Some(Ok(members)) => {
                        metrics::record_sync_event(SyncEventType::WatchUpdate);
                        self.apply(&members);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "membership watch failed, reconnecting");
                        metrics::record_source_error(&e);
                        return true;
                    }
                    None => {
                        info!("membership watch ended, reconnecting");
                        metrics::record_source_error(&SourceError::StreamEnded);
                        return true;
                    }
                },
            }
        }
    }
}
