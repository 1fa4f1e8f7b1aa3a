//! DNS server setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::TailnetAuthority;
use crate::config::{DnsConfig, MembershipConfig};
use crate::directory::DirectoryStore;
use crate::error::DnsError;
use crate::membership::MembershipSource;
use crate::sync::Synchronizer;
use crate::tailscale::TailscaleStatusSource;

/// Interval for emitting directory metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit directory metrics.
async fn metrics_loop(store: DirectoryStore, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(
                    entries = store.len(),
                    serial = store.serial(),
                    "emitted directory metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build a catalog serving `config.zone` from `store`.
///
/// `chained` authorities are registered after ours on the same origin and
/// answer whatever falls through. With nothing chained, fallthrough is turned
/// off: a skipped query would otherwise get no response at all.
pub fn build_catalog(
    mut config: DnsConfig,
    store: DirectoryStore,
    chained: Vec<Arc<dyn AuthorityObject>>,
) -> Result<Catalog, DnsError> {
    if chained.is_empty() && config.fallthrough.is_some() {
        warn!(
            zone = %config.zone,
            "fallthrough configured without a next authority, answering misses with NXDOMAIN"
        );
        config.fallthrough = None;
    }

    let authority = TailnetAuthority::new(config, store)?;
    let origin = authority.origin().clone();

    let mut authorities: Vec<Arc<dyn AuthorityObject>> = vec![Arc::new(authority)];
    authorities.extend(chained);

    let mut catalog = Catalog::new();
    catalog.upsert(origin, authorities);
    Ok(catalog)
}

/// DNS server for tailnet members.
pub struct DnsServer {
    config: DnsConfig,
    membership: MembershipConfig,
    store: DirectoryStore,
    chained: Vec<Arc<dyn AuthorityObject>>,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig, membership: MembershipConfig) -> Self {
        Self {
            config,
            membership,
            store: DirectoryStore::new(),
            chained: Vec::new(),
        }
    }

    /// Add an authority that answers queries falling through ours.
    pub fn with_next(mut self, authority: Arc<dyn AuthorityObject>) -> Self {
        self.chained.push(authority);
        self
    }

    /// Get a reference to the directory store.
    pub fn store(&self) -> &DirectoryStore {
        &self.store
    }

    /// Run against the configured tailscaled status endpoint until `shutdown`
    /// is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let source = TailscaleStatusSource::new(&self.membership)?;
        self.run_with_source(Arc::new(source), shutdown).await
    }

    /// Run with an explicit membership source until `shutdown` is cancelled.
    pub async fn run_with_source(
        self,
        source: Arc<dyn MembershipSource>,
        shutdown: CancellationToken,
    ) -> Result<(), DnsError> {
        self.config.validate()?;

        info!(
            listen_addr = %self.config.listen_addr,
            zone = %self.config.zone,
            status_url = %self.membership.status_url,
            "Starting tailnet-dns server"
        );

        let synchronizer = Synchronizer::new(
            source,
            self.store.clone(),
            self.config.zone.clone(),
            self.membership.refresh_interval(),
            self.membership.reconnect_backoff(),
        );
        let sync_handle = tokio::spawn(synchronizer.run(shutdown.child_token()));

        // Wait for initial sync before starting DNS server
        info!("Waiting for initial membership sync...");
        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested before membership sync completed");
                if let Err(e) = sync_handle.await {
                    error!("Membership sync task panicked: {}", e);
                }
                return Ok(());
            }

            if self.store.is_ready() {
                info!(entries = self.store.len(), "Initial membership sync complete");
                break;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let catalog = build_catalog(self.config.clone(), self.store.clone(), self.chained)?;
        let mut server = ServerFuture::new(catalog);

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, Duration::from_secs(30));

        info!(zone = %self.config.zone, "DNS server ready to serve queries");

        let metrics_handle =
            tokio::spawn(metrics_loop(self.store.clone(), shutdown.child_token()));
        self.store.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                shutdown.cancel();
            }
        }

        if let Err(e) = metrics_handle.await {
            error!("Metrics task panicked: {}", e);
        }

        info!("Waiting for membership sync to stop...");
        if let Err(e) = sync_handle.await {
            error!("Membership sync task panicked: {}", e);
        }

        info!("DNS server stopped");
        Ok(())
    }
}
