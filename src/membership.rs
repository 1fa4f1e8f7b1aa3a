//! Tailnet membership and its projection into a [`Directory`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::net::IpAddr;
use tracing::trace;

use crate::directory::{canonical_key, Directory};
use crate::error::SourceError;

/// Tag prefix marking a member as the target of an alias.
///
/// A member tagged `tag:cname-www` makes `www.<zone>` a CNAME to the member.
pub const ALIAS_TAG_PREFIX: &str = "tag:cname-";

/// One member of the tailnet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    /// Hostname, possibly fully qualified. Only the first label is used.
    pub hostname: String,
    /// ACL tags, e.g. `tag:server`.
    pub tags: Vec<String>,
    /// Tailnet addresses in source order.
    pub addresses: Vec<IpAddr>,
    /// Shared in from another tailnet. Hostnames of shared nodes are not unique.
    pub shared: bool,
    /// Plain WireGuard peer, such as a third-party exit node.
    pub wireguard_only: bool,
}

/// Stream of full membership snapshots.
pub type MemberStream = BoxStream<'static, Result<Vec<Member>, SourceError>>;

/// Where membership comes from.
///
/// `poll` returns the full current membership. `watch` optionally returns a
/// stream yielding a full membership every time it changes. Sources that
/// cannot stream keep the default, and the synchronizer then polls.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Fetch the full current membership.
    async fn poll(&self) -> Result<Vec<Member>, SourceError>;

    /// Subscribe to membership changes, if supported.
    async fn watch(&self) -> Result<Option<MemberStream>, SourceError> {
        Ok(None)
    }
}

impl Directory {
    /// Build a directory for `zone` from a membership snapshot.
    ///
    /// Each eligible member contributes its addresses under its hostname, and
    /// every `tag:cname-<alias>` tag adds `<hostname>.<zone>.` as an alias
    /// target of `<alias>`.
    pub fn from_members(zone: &str, members: &[Member]) -> Self {
        let zone = zone.trim_end_matches('.').to_ascii_lowercase();
        let mut directory = Directory::new();

        for member in members {
            if member.shared || member.wireguard_only {
                trace!(hostname = %member.hostname, "skipping non-local member");
                continue;
            }
            let Some(host) = canonical_key(&member.hostname) else {
                continue;
            };

            for addr in &member.addresses {
                match addr {
                    IpAddr::V4(v4) => directory.add_v4(&host, *v4),
                    IpAddr::V6(v6) => directory.add_v6(&host, *v6),
                }
            }

            for tag in &member.tags {
                if let Some(alias) = tag.strip_prefix(ALIAS_TAG_PREFIX) {
                    directory.add_alias(alias, format!("{}.{}.", host, zone));
                }
            }
        }

        directory
    }
}
