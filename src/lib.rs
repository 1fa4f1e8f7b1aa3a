//! Tailnet DNS - An authoritative DNS server for the members of a tailnet.
//!
//! This crate answers A, AAAA and CNAME queries for a configured zone using
//! the membership of a tailnet. Each eligible member is reachable as
//! `<hostname>.<zone>` and `tag:cname-<alias>` tags turn into CNAME records
//! pointing at the tagged member.
//!
//! ## Features
//!
//! - Queries read an immutable directory snapshot, swapped whole on change
//! - CNAME answers carry the alias target's addresses as glue
//! - Optional fallthrough to the next authority for names not in the tailnet
//! - Background membership sync with retry and graceful shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          tailnet-dns                            │
//! │                                                                 │
//! │  ┌──────────────────┐    ┌──────────────────┐                  │
//! │  │ Membership       │───▶│ Directory Store  │                  │
//! │  │ Source + Sync    │    │ (snapshot swap)  │                  │
//! │  └──────────────────┘    └────────┬─────────┘                  │
//! │         │                         │                             │
//! │         │ Poll or watch:          ▼                             │
//! │         │ - tailscaled      ┌──────────────────┐               │
//! │         │   status          │ Resolver + Policy │               │
//! │         │                   └────────┬─────────┘               │
//! │         │                            ▼                          │
//! │         │                   ┌──────────────────┐               │
//! │         │                   │  Hickory DNS     │◀── UDP/TCP    │
//! │         │                   │  Server          │    :53        │
//! │         └──────────────────▶└──────────────────┘               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! www.ts.example.com  A
//!   → first label "www" is an alias of "web"
//!   → www.ts.example.com.  CNAME  web.ts.example.com.
//!   → web.ts.example.com.  A      100.64.0.2
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use tailnet_dns::{DnsConfig, DnsServer, MembershipConfig, SoaConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "[::]:5353".parse().unwrap(),
//!         zone: "ts.example.com".to_string(),
//!         ttl: 60,
//!         fallthrough: None,
//!         soa: SoaConfig::default(),
//!     };
//!
//!     let shutdown = CancellationToken::new();
//!     let server = DnsServer::new(config, MembershipConfig::default());
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod directory;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod policy;
pub mod resolver;
pub mod server;
pub mod sync;
pub mod tailscale;
pub mod telemetry;

// Re-export main types
pub use config::{Config, DnsConfig, MembershipConfig, SoaConfig, TelemetryConfig};
pub use directory::{Directory, DirectoryStore};
pub use error::{DnsError, SourceError};
pub use membership::{Member, MembershipSource};
pub use policy::{Decision, Fallthrough, ResponsePolicy};
pub use resolver::{RecordKind, Resolver, ResourceRecord};
pub use server::DnsServer;
pub use sync::Synchronizer;
