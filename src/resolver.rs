//! Resolution of A, AAAA and CNAME queries against a directory snapshot.
//!
//! ```text
//! web.ts.example.com  A
//!   → key "web"
//!   → direct A records?         yes → one A per address, done
//!   → otherwise aliases of "web": for each target
//!        CNAME web → target
//!        direct A records of target's key (never target's own aliases)
//! ```
//!
//! Alias chasing stops after one hop, so a cyclic alias graph cannot loop.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::trace;

use crate::directory::{canonical_key, Directory, DirectoryStore};

/// Record kinds this resolver answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// IPv4 address.
    A,
    /// IPv6 address.
    Aaaa,
    /// Alias.
    Cname,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
            RecordKind::Cname => "CNAME",
        };
        f.write_str(s)
    }
}

/// Value carried by a resolved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    /// IPv4 address.
    A(Ipv4Addr),
    /// IPv6 address.
    Aaaa(Ipv6Addr),
    /// Fully-qualified alias target.
    Cname(String),
}

/// One answer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Owner name exactly as it should appear in the answer.
    pub owner: String,
    /// Time to live in seconds.
    pub ttl: u32,
    /// Record value.
    pub data: RecordData,
}

impl ResourceRecord {
    /// Kind of this record.
    pub fn kind(&self) -> RecordKind {
        match self.data {
            RecordData::A(_) => RecordKind::A,
            RecordData::Aaaa(_) => RecordKind::Aaaa,
            RecordData::Cname(_) => RecordKind::Cname,
        }
    }
}

/// Which address kinds to attach after each alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glue {
    V4,
    V6,
    Both,
}

impl Glue {
    fn v4(self) -> bool {
        matches!(self, Glue::V4 | Glue::Both)
    }

    fn v6(self) -> bool {
        matches!(self, Glue::V6 | Glue::Both)
    }
}

/// Resolve `query_name` for `kind` against a single snapshot.
///
/// `query_name` is used verbatim as owner of direct and CNAME records. Alias
/// glue is owned by the alias target. An empty result is a miss.
pub fn resolve(
    directory: &Directory,
    query_name: &str,
    kind: RecordKind,
    ttl: u32,
) -> Vec<ResourceRecord> {
    let Some(key) = canonical_key(query_name) else {
        trace!(name = %query_name, "no usable label in query name");
        return Vec::new();
    };

    let mut out = Vec::new();
    match kind {
        RecordKind::A => {
            if !push_v4(directory, &key, query_name, ttl, &mut out) {
                trace!(key = %key, "no A records, trying aliases");
                push_aliases(directory, &key, query_name, Glue::V4, ttl, &mut out);
            }
        }
        RecordKind::Aaaa => {
            if !push_v6(directory, &key, query_name, ttl, &mut out) {
                trace!(key = %key, "no AAAA records, trying aliases");
                push_aliases(directory, &key, query_name, Glue::V6, ttl, &mut out);
            }
        }
        RecordKind::Cname => {
            push_aliases(directory, &key, query_name, Glue::Both, ttl, &mut out);
        }
    }
    out
}

/// Append direct A records. Returns false if the key has none.
fn push_v4(
    directory: &Directory,
    key: &str,
    owner: &str,
    ttl: u32,
    out: &mut Vec<ResourceRecord>,
) -> bool {
    let Some(set) = directory.get(key).filter(|set| !set.v4.is_empty()) else {
        return false;
    };
    out.extend(set.v4.iter().map(|addr| ResourceRecord {
        owner: owner.to_string(),
        ttl,
        data: RecordData::A(*addr),
    }));
    true
}

/// Append direct AAAA records. Returns false if the key has none.
fn push_v6(
    directory: &Directory,
    key: &str,
    owner: &str,
    ttl: u32,
    out: &mut Vec<ResourceRecord>,
) -> bool {
    let Some(set) = directory.get(key).filter(|set| !set.v6.is_empty()) else {
        return false;
    };
    out.extend(set.v6.iter().map(|addr| ResourceRecord {
        owner: owner.to_string(),
        ttl,
        data: RecordData::Aaaa(*addr),
    }));
    true
}

fn push_aliases(
    directory: &Directory,
    key: &str,
    owner: &str,
    glue: Glue,
    ttl: u32,
    out: &mut Vec<ResourceRecord>,
) {
    let Some(set) = directory.get(key) else {
        return;
    };

    for target in &set.aliases {
        out.push(ResourceRecord {
            owner: owner.to_string(),
            ttl,
            data: RecordData::Cname(target.clone()),
        });

        let Some(target_key) = canonical_key(target) else {
            continue;
        };
        // Direct records only: the target's own aliases are not followed.
        if glue.v4() {
            push_v4(directory, &target_key, target, ttl, out);
        }
        if glue.v6() {
            push_v6(directory, &target_key, target, ttl, out);
        }
    }
}

/// Resolver bound to a live [`DirectoryStore`].
#[derive(Debug, Clone)]
pub struct Resolver {
    store: DirectoryStore,
    ttl: u32,
}

impl Resolver {
    /// Create a resolver stamping records with `ttl`.
    pub fn new(store: DirectoryStore, ttl: u32) -> Self {
        Self { store, ttl }
    }

    /// Resolve against the snapshot current at call time.
    ///
    /// The whole query is answered from that one snapshot even if a publish
    /// lands midway.
    pub fn resolve(&self, query_name: &str, kind: RecordKind) -> Vec<ResourceRecord> {
        let directory: Arc<Directory> = self.store.snapshot();
        resolve(&directory, query_name, kind, self.ttl)
    }
}
