//! Decides what to do with a resolved query.
//!
//! A non-empty resolution is answered. An empty one is either handed to the
//! next authority in the chain (fallthrough) or answered with NXDOMAIN.

use tracing::debug;

use crate::resolver::{RecordKind, Resolver, ResourceRecord};

/// Terminal decision for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Records found, answer authoritatively.
    Answer,
    /// Nothing found, answer authoritatively that the name does not exist.
    NotFound,
    /// Nothing found, let the next handler answer the unmodified query.
    Delegate,
}

impl Decision {
    /// Short label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Answer => "answer",
            Decision::NotFound => "nxdomain",
            Decision::Delegate => "delegate",
        }
    }
}

/// Outcome of [`ResponsePolicy::build_answer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Answer records, empty unless `decision` is [`Decision::Answer`].
    pub records: Vec<ResourceRecord>,
    /// What the caller should do.
    pub decision: Decision,
    /// Set for `Answer` and `NotFound`. A delegated query gets no response here.
    pub authoritative: bool,
}

/// Zones whose misses fall through to the next handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fallthrough {
    /// Misses are always NXDOMAIN.
    #[default]
    Disabled,
    /// Every miss falls through.
    All,
    /// Misses inside one of these zones fall through. Stored lowercased without
    /// the trailing dot.
    Zones(Vec<String>),
}

impl Fallthrough {
    /// Build from the configured zone list.
    ///
    /// `None` disables fallthrough. An empty list, or a list containing the
    /// root zone, falls through everywhere.
    pub fn from_config(zones: Option<&[String]>) -> Self {
        let Some(zones) = zones else {
            return Fallthrough::Disabled;
        };
        if zones.is_empty() {
            return Fallthrough::All;
        }

        let mut normalized = Vec::with_capacity(zones.len());
        for zone in zones {
            let zone = zone.trim_end_matches('.').to_ascii_lowercase();
            if zone.is_empty() {
                return Fallthrough::All;
            }
            normalized.push(zone);
        }
        Fallthrough::Zones(normalized)
    }

    /// True if a miss for `name` should be delegated.
    ///
    /// Matching is by whole labels: `a.example.com` is inside `example.com`,
    /// `badexample.com` is not.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Fallthrough::Disabled => false,
            Fallthrough::All => true,
            Fallthrough::Zones(zones) => {
                let name = name.trim_end_matches('.').to_ascii_lowercase();
                zones.iter().any(|zone| {
                    name == *zone
                        || name
                            .strip_suffix(zone.as_str())
                            .is_some_and(|prefix| prefix.ends_with('.'))
                })
            }
        }
    }
}

/// Runs the resolver and turns its result into a [`Decision`].
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    resolver: Resolver,
    fallthrough: Fallthrough,
}

impl ResponsePolicy {
    /// Create a policy around `resolver`.
    pub fn new(resolver: Resolver, fallthrough: Fallthrough) -> Self {
        Self {
            resolver,
            fallthrough,
        }
    }

    /// Resolve `query_name` for `kind` and decide how to respond.
    pub fn build_answer(&self, query_name: &str, kind: RecordKind) -> Answer {
        let records = self.resolver.resolve(query_name, kind);
        if records.is_empty() {
            return self.miss(query_name);
        }

        debug!(name = %query_name, kind = %kind, count = records.len(), "answering");
        Answer {
            records,
            decision: Decision::Answer,
            authoritative: true,
        }
    }

    /// Decision for a query that produced no records.
    pub fn miss(&self, query_name: &str) -> Answer {
        let decision = if self.fallthrough.matches(query_name) {
            Decision::Delegate
        } else {
            Decision::NotFound
        };
        debug!(name = %query_name, decision = decision.as_str(), "no records");

        Answer {
            records: Vec::new(),
            decision,
            authoritative: decision == Decision::NotFound,
        }
    }
}
