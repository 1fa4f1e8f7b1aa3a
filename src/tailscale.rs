//! Membership source reading tailscaled over its HTTP LocalAPI.
//!
//! Two endpoints are used:
//!
//! - the status endpoint returns the same JSON as `tailscale status --json`:
//!   a `Self` node and a `Peer` map;
//! - the IPN bus endpoint streams newline-delimited notifications, some of
//!   which carry a full netmap (`SelfNode` plus `Peers`).
//!
//! Only the fields needed for DNS are decoded.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::config::MembershipConfig;
use crate::directory::canonical_key;
use crate::error::SourceError;
use crate::membership::{Member, MemberStream, MembershipSource};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Status {
    #[serde(rename = "Self", default)]
    self_node: Option<PeerStatus>,
    #[serde(default)]
    peer: Option<BTreeMap<String, PeerStatus>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PeerStatus {
    #[serde(default)]
    host_name: String,
    #[serde(rename = "DNSName", default)]
    dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    sharee_node: bool,
    #[serde(default)]
    is_wire_guard_only: bool,
}

impl PeerStatus {
    /// The node's DNS label, preferring the MagicDNS name over the raw hostname.
    fn computed_name(&self) -> String {
        canonical_key(&self.dns_name)
            .or_else(|| canonical_key(&self.host_name))
            .unwrap_or_default()
    }

    fn into_member(self) -> Member {
        let hostname = self.computed_name();
        let addresses = parse_addresses(&hostname, self.tailscale_ips.unwrap_or_default());

        Member {
            hostname,
            tags: self.tags.unwrap_or_default(),
            addresses,
            shared: self.sharee_node,
            wireguard_only: self.is_wire_guard_only,
        }
    }
}

/// Parse addresses, with or without a prefix length (`100.64.0.1/32`).
fn parse_addresses(hostname: &str, raw: Vec<String>) -> Vec<IpAddr> {
    raw.into_iter()
        .filter_map(|ip| {
            let addr = ip.split('/').next().unwrap_or_default();
            match addr.parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(hostname = %hostname, ip = %ip, "ignoring unparsable address");
                    None
                }
            }
        })
        .collect()
}

/// One IPN bus notification. Most carry no netmap.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Notify {
    #[serde(default)]
    err_message: Option<String>,
    #[serde(default)]
    net_map: Option<NetMap>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetMap {
    #[serde(default)]
    self_node: Option<Node>,
    #[serde(default)]
    peers: Option<Vec<Node>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Node {
    #[serde(default)]
    name: String,
    #[serde(default)]
    computed_name: String,
    #[serde(default)]
    hostinfo: Option<Hostinfo>,
    #[serde(default)]
    addresses: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    /// Non-zero when the node is shared in from another user.
    #[serde(default)]
    sharer: i64,
    #[serde(default)]
    is_wire_guard_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Hostinfo {
    #[serde(default)]
    hostname: String,
}

impl Node {
    fn computed_name(&self) -> String {
        canonical_key(&self.computed_name)
            .or_else(|| canonical_key(&self.name))
            .or_else(|| self.hostinfo.as_ref().and_then(|h| canonical_key(&h.hostname)))
            .unwrap_or_default()
    }

    fn into_member(self) -> Member {
        let hostname = self.computed_name();
        let addresses = parse_addresses(&hostname, self.addresses.unwrap_or_default());

        Member {
            hostname,
            tags: self.tags.unwrap_or_default(),
            addresses,
            shared: self.sharer != 0,
            wireguard_only: self.is_wire_guard_only,
        }
    }
}

/// Parse one IPN bus line.
///
/// Returns `None` for blank lines and notifications without a netmap.
pub fn parse_notify(line: &[u8]) -> Result<Option<Vec<Member>>, SourceError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(None);
    }

    let notify: Notify =
        serde_json::from_slice(line).map_err(|e| SourceError::Decode(e.to_string()))?;
    if let Some(message) = notify.err_message {
        return Err(SourceError::Unreachable(message));
    }
    let Some(net_map) = notify.net_map else {
        return Ok(None);
    };

    let members = net_map
        .self_node
        .into_iter()
        .chain(net_map.peers.unwrap_or_default())
        .map(Node::into_member)
        .collect();
    Ok(Some(members))
}

/// Turn a newline-delimited notification body into a stream of memberships.
///
/// The stream ends after the first error.
fn netmap_stream<S, B>(body: S) -> MemberStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (body.fuse().boxed(), Vec::<u8>::new(), false);

    stream::unfold(state, |(mut body, mut buf, done)| async move {
        if done {
            return None;
        }
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match parse_notify(&line) {
                    Ok(Some(members)) => return Some((Ok(members), (body, buf, false))),
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), (body, buf, true))),
                }
            }

            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    let err = SourceError::Unreachable(e.to_string());
                    return Some((Err(err), (body, buf, true)));
                }
                // Flush a final line that had no newline.
                None if buf.iter().any(|b| !b.is_ascii_whitespace()) => buf.push(b'\n'),
                None => return None,
            }
        }
    })
    .boxed()
}

/// Parse a status document into members, self node first.
pub fn parse_status(body: &[u8]) -> Result<Vec<Member>, SourceError> {
    let status: Status =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    let members: Vec<Member> = status
        .self_node
        .into_iter()
        .chain(status.peer.unwrap_or_default().into_values())
        .map(PeerStatus::into_member)
        .collect();

    Ok(members)
}

/// Reads membership from a tailscaled-compatible LocalAPI.
///
/// Follows the IPN bus when a watch URL is configured and falls back to
/// polling the status endpoint.
pub struct TailscaleStatusSource {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    url: String,
    watch_url: Option<String>,
    auth_token: Option<String>,
}

impl TailscaleStatusSource {
    /// Create a source from configuration.
    pub fn new(config: &MembershipConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        // A total timeout would cut the watch body off.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            stream_client,
            url: config.status_url.clone(),
            watch_url: config.watch_url.clone().filter(|url| !url.is_empty()),
            auth_token: config.auth_token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.basic_auth("", Some(token)),
            None => request,
        }
    }
}

#[async_trait]
impl MembershipSource for TailscaleStatusSource {
    async fn poll(&self) -> Result<Vec<Member>, SourceError> {
        let response = self
            .authorize(self.client.get(&self.url))
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unreachable(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let members = parse_status(&body)?;
        debug!(url = %self.url, members = members.len(), "fetched tailnet status");
        Ok(members)
    }

    async fn watch(&self) -> Result<Option<MemberStream>, SourceError> {
        let Some(url) = &self.watch_url else {
            return Ok(None);
        };

        let response = self
            .authorize(self.stream_client.get(url))
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unreachable(format!("HTTP {}", status)));
        }

        info!(url = %url, "watching tailnet netmap");
        Ok(Some(netmap_stream(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const STATUS: &str = r#"{
        "Version": "1.80.0",
        "Self": {
            "ID": "n1",
            "HostName": "DNS Server",
            "DNSName": "coredns.tail1234.ts.net.",
            "TailscaleIPs": ["100.64.0.1", "fd7a:115c:a1e0::1"],
            "Tags": ["tag:dns"]
        },
        "Peer": {
            "nodekey:bbb": {
                "HostName": "web-1",
                "DNSName": "web-1.tail1234.ts.net.",
                "TailscaleIPs": ["100.64.0.2", "fd7a:115c:a1e0::2"],
                "Tags": ["tag:server", "tag:cname-www"]
            },
            "nodekey:ccc": {
                "HostName": "friend",
                "DNSName": "friend.other.ts.net.",
                "TailscaleIPs": ["100.64.0.3"],
                "ShareeNode": true
            },
            "nodekey:ddd": {
                "HostName": "Laptop",
                "DNSName": "",
                "TailscaleIPs": null
            }
        }
    }"#;

    fn config(url: String) -> MembershipConfig {
        MembershipConfig {
            status_url: url,
            request_timeout_secs: 2,
            ..Default::default()
        }
    }

    /// Serve one canned HTTP response and return the URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}/localapi/v0/status", addr)
    }

    #[test]
    fn test_parse_status_self_first() {
        let members = parse_status(STATUS.as_bytes()).unwrap();

        assert_eq!(members.len(), 4);
        assert_eq!(members[0].hostname, "coredns");
        assert_eq!(members[0].addresses.len(), 2);
        assert_eq!(members[0].tags, vec!["tag:dns".to_string()]);
    }

    #[test]
    fn test_parse_status_peer_fields() {
        let members = parse_status(STATUS.as_bytes()).unwrap();

        let web = members.iter().find(|m| m.hostname == "web-1").unwrap();
        assert!(web.tags.contains(&"tag:cname-www".to_string()));
        assert!(!web.shared);

        let friend = members.iter().find(|m| m.hostname == "friend").unwrap();
        assert!(friend.shared);
    }

    #[test]
    fn test_parse_status_falls_back_to_hostname() {
        let members = parse_status(STATUS.as_bytes()).unwrap();
        let laptop = members.iter().find(|m| m.hostname == "laptop").unwrap();
        assert!(laptop.addresses.is_empty());
    }

    #[test]
    fn test_parse_status_without_peers() {
        let members = parse_status(br#"{"Self": {"DNSName": "solo.ts.net."}, "Peer": null}"#).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].hostname, "solo");
    }

    #[test]
    fn test_parse_status_skips_bad_address() {
        let members =
            parse_status(br#"{"Self": {"DNSName": "a.ts.net.", "TailscaleIPs": ["nope", "100.64.0.1"]}}"#)
                .unwrap();
        assert_eq!(members[0].addresses.len(), 1);
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        assert!(matches!(
            parse_status(b"<html>"),
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_fetches_members() {
        let url = serve_once("200 OK", STATUS).await;
        let source = TailscaleStatusSource::new(&config(url)).unwrap();

        let members = source.poll().await.unwrap();
        assert_eq!(members.len(), 4);
    }

    #[tokio::test]
    async fn test_poll_error_status_is_unreachable() {
        let url = serve_once("503 Service Unavailable", "").await;
        let source = TailscaleStatusSource::new(&config(url)).unwrap();

        assert!(matches!(
            source.poll().await,
            Err(SourceError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source =
            TailscaleStatusSource::new(&config(format!("http://{}/localapi/v0/status", addr)))
                .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), source.poll())
            .await
            .unwrap();
        assert!(matches!(result, Err(SourceError::Unreachable(_))));
    }

    const NETMAP: &str = r#"{"NetMap":{"SelfNode":{"Name":"coredns.tail1234.ts.net.","Addresses":["100.64.0.1/32","fd7a:115c:a1e0::1/128"],"Tags":["tag:dns"]},"Peers":[{"Name":"web-1.tail1234.ts.net.","Addresses":["100.64.0.2/32"],"Tags":["tag:cname-www"]},{"Name":"friend.other.ts.net.","Addresses":["100.64.0.3/32"],"Sharer":42},{"Hostinfo":{"Hostname":"Laptop"},"Addresses":[]}]}}"#;

    const WATCH_BODY: &str = concat!(
        r#"{"Version":"1.80.0","State":6}"#,
        "\n",
        r#"{"NetMap":{"SelfNode":{"Name":"coredns.tail1234.ts.net.","Addresses":["100.64.0.1/32"]}}}"#,
        "\n",
        r#"{"Engine":{"RBytes":10}}"#,
        "\n",
        r#"{"NetMap":{"SelfNode":{"Name":"coredns.tail1234.ts.net.","Addresses":["100.64.0.1/32"]},"Peers":[{"Name":"db.tail1234.ts.net.","Addresses":["100.64.0.4/32"]}]}}"#,
        "\n",
    );

    fn watch_config(watch_url: Option<String>) -> MembershipConfig {
        MembershipConfig {
            watch_url,
            request_timeout_secs: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_notify_netmap() {
        let members = parse_notify(NETMAP.as_bytes()).unwrap().unwrap();

        assert_eq!(members.len(), 4);
        assert_eq!(members[0].hostname, "coredns");
        assert_eq!(
            members[0].addresses,
            vec![
                "100.64.0.1".parse::<IpAddr>().unwrap(),
                "fd7a:115c:a1e0::1".parse().unwrap()
            ]
        );

        let friend = members.iter().find(|m| m.hostname == "friend").unwrap();
        assert!(friend.shared);

        let laptop = members.iter().find(|m| m.hostname == "laptop").unwrap();
        assert!(laptop.addresses.is_empty());
        assert!(!laptop.shared);
    }

    #[test]
    fn test_parse_notify_without_netmap() {
        assert!(parse_notify(br#"{"Version":"1.80.0"}"#).unwrap().is_none());
        assert!(parse_notify(b"  \r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_notify_error_message() {
        assert!(matches!(
            parse_notify(br#"{"ErrMessage":"not logged in"}"#),
            Err(SourceError::Unreachable(_))
        ));
        assert!(matches!(
            parse_notify(b"{not json"),
            Err(SourceError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_netmap_stream_reassembles_split_lines() {
        let (head, tail) = WATCH_BODY.split_at(57);
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(head.as_bytes().to_vec()), Ok(tail.as_bytes().to_vec())];

        let snapshots: Vec<_> = netmap_stream(stream::iter(chunks)).collect().await;

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].as_ref().unwrap().len(), 1);
        assert_eq!(snapshots[1].as_ref().unwrap()[1].hostname, "db");
    }

    #[tokio::test]
    async fn test_netmap_stream_flushes_last_line() {
        let body = NETMAP.as_bytes().to_vec();
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(body)];

        let snapshots: Vec<_> = netmap_stream(stream::iter(chunks)).collect().await;

        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].is_ok());
    }

    #[tokio::test]
    async fn test_netmap_stream_stops_after_bad_line() {
        let body = format!("{{oops\n{}\n", NETMAP).into_bytes();
        let chunks: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(body)];

        let snapshots: Vec<_> = netmap_stream(stream::iter(chunks)).collect().await;

        assert_eq!(snapshots.len(), 1);
        assert!(matches!(snapshots[0], Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_watch_streams_netmaps() {
        let url = serve_once("200 OK", WATCH_BODY).await;
        let source = TailscaleStatusSource::new(&watch_config(Some(url))).unwrap();

        let stream = source.watch().await.unwrap().expect("watch enabled");
        let snapshots: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .unwrap();

        assert_eq!(snapshots.len(), 2);
        let last = snapshots[1].as_ref().unwrap();
        assert!(last.iter().any(|m| m.hostname == "db"));
    }

    #[tokio::test]
    async fn test_watch_error_status_is_unreachable() {
        let url = serve_once("404 Not Found", "").await;
        let source = TailscaleStatusSource::new(&watch_config(Some(url))).unwrap();

        assert!(matches!(
            source.watch().await,
            Err(SourceError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_disabled() {
        let source = TailscaleStatusSource::new(&watch_config(None)).unwrap();
        assert!(source.watch().await.unwrap().is_none());

        let source = TailscaleStatusSource::new(&watch_config(Some(String::new()))).unwrap();
        assert!(source.watch().await.unwrap().is_none());
    }
}
