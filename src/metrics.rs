//! Metrics instrumentation for tailnet-dns.
//!
//! All metrics are prefixed with `tailnet_dns.`

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

use crate::error::SourceError;

pub(crate) const QUERY_COUNT: &str = "tailnet_dns.query.count";
pub(crate) const QUERY_DURATION: &str = "tailnet_dns.query.duration.seconds";
pub(crate) const RECORDS_RETURNED: &str = "tailnet_dns.query.records_returned";
const PUBLISH_COUNT: &str = "tailnet_dns.directory.publish.count";
const SYNC_EVENT_COUNT: &str = "tailnet_dns.sync.event.count";
const SYNC_ERROR_COUNT: &str = "tailnet_dns.sync.error.count";
const DIRECTORY_ENTRIES: &str = "tailnet_dns.directory.entries";
const DIRECTORY_ALIASES: &str = "tailnet_dns.directory.aliases";
const DIRECTORY_SERIAL: &str = "tailnet_dns.directory.serial";
const DIRECTORY_READY: &str = "tailnet_dns.directory.ready";

/// Query latency buckets. Lookups are in-memory, so most land well under 1ms.
#[cfg_attr(not(feature = "prometheus"), allow(dead_code))]
pub(crate) const QUERY_DURATION_BUCKETS: &[f64] =
    &[0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05];

/// Answer size buckets. An alias with two dual-stack targets yields six.
#[cfg_attr(not(feature = "prometheus"), allow(dead_code))]
pub(crate) const RECORDS_RETURNED_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 16.0, 32.0];

/// Register units and descriptions for every series with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(QUERY_COUNT, Unit::Count, "DNS queries by record type and result");
    describe_histogram!(QUERY_DURATION, Unit::Seconds, "Time to answer a DNS query");
    describe_histogram!(RECORDS_RETURNED, Unit::Count, "Records in an answered query");
    describe_counter!(
        PUBLISH_COUNT,
        Unit::Count,
        "Directory publishes, split by whether content changed"
    );
    describe_counter!(SYNC_EVENT_COUNT, Unit::Count, "Membership polls and watch events");
    describe_counter!(SYNC_ERROR_COUNT, Unit::Count, "Membership source failures by reason");
    describe_gauge!(DIRECTORY_ENTRIES, Unit::Count, "Names in the current directory");
    describe_gauge!(DIRECTORY_ALIASES, Unit::Count, "Alias targets in the current directory");
    describe_gauge!(DIRECTORY_SERIAL, "SOA serial of the current directory");
    describe_gauge!(DIRECTORY_READY, "1 once the first directory has been published");
}

/// Record a DNS query and how it was answered.
///
/// `result` is a [`Decision`](crate::policy::Decision) label, or `nodata` for
/// apex queries of a type the zone does not carry.
pub fn record_query(record_type: &str, result: &'static str, duration: std::time::Duration) {
    counter!(QUERY_COUNT, "type" => record_type.to_string(), "result" => result).increment(1);
    histogram!(QUERY_DURATION, "type" => record_type.to_string()).record(duration.as_secs_f64());
}

/// Record how many records an answered query carried.
pub fn record_records_returned(count: usize) {
    histogram!(RECORDS_RETURNED).record(count as f64);
}

/// Record a directory publish.
pub fn record_publish(changed: bool) {
    let outcome = if changed { "changed" } else { "unchanged" };
    counter!(PUBLISH_COUNT, "outcome" => outcome).increment(1);
}

/// Record a membership sync event.
pub fn record_sync_event(event_type: SyncEventType) {
    let event_str = match event_type {
        SyncEventType::Poll => "poll",
        SyncEventType::WatchConnected => "watch_connected",
        SyncEventType::WatchUpdate => "watch_update",
    };

    counter!(SYNC_EVENT_COUNT, "event" => event_str).increment(1);
}

/// Membership sync event types.
#[derive(Debug, Clone, Copy)]
pub enum SyncEventType {
    /// Successful poll.
    Poll,
    /// Watch stream opened.
    WatchConnected,
    /// Snapshot received on a watch stream.
    WatchUpdate,
}

/// Record a membership source failure.
pub fn record_source_error(error: &SourceError) {
    counter!(SYNC_ERROR_COUNT, "reason" => error.reason()).increment(1);
}

/// Record directory gauges (call periodically).
pub fn record_directory(entries: usize, aliases: usize, serial: u32, ready: bool) {
    gauge!(DIRECTORY_ENTRIES).set(entries as f64);
    gauge!(DIRECTORY_ALIASES).set(aliases as f64);
    gauge!(DIRECTORY_SERIAL).set(serial as f64);
    gauge!(DIRECTORY_READY).set(if ready { 1.0 } else { 0.0 });
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
