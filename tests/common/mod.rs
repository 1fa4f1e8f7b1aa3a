//! Shared test infrastructure for catalog integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, RecordSet, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{
    Authority, AuthorityObject, Catalog, LookupControlFlow, LookupError, LookupOptions,
    LookupRecords, MessageRequest, MessageResponse, UpdateResult, ZoneType,
};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, RequestInfo, ResponseHandler, ResponseInfo};

use tailnet_dns::config::{DnsConfig, SoaConfig};
use tailnet_dns::directory::{Directory, DirectoryStore};
use tailnet_dns::server;

// --- Constants ---

pub const ZONE: &str = "ts.example.com";

/// Address answered by [`FallbackAuthority`] for every A query.
pub const FALLBACK_V4: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 53);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and
/// stored as raw wire-format bytes, parsed back with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- FallbackAuthority ---

/// Stand-in for the next authority in a chain: answers every A query in the
/// zone with [`FALLBACK_V4`].
pub struct FallbackAuthority {
    origin: LowerName,
}

impl FallbackAuthority {
    pub fn new(zone: &str) -> Self {
        Self {
            origin: Name::from_ascii(zone).unwrap().into(),
        }
    }
}

#[async_trait]
impl Authority for FallbackAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        if rtype != RecordType::A {
            return LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)));
        }

        let name = Name::from(name.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::A, 0);
        let mut record = Record::from_rdata(name, 30, RData::A(A::from(FALLBACK_V4)));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, Arc::new(record_set))))
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        Authority::lookup(
            self,
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        Err(ResponseCode::NotImp)
    }
}

// --- Config builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        zone: ZONE.to_string(),
        ttl: 60,
        fallthrough: None,
        soa: SoaConfig::default(),
    }
}

pub fn test_dns_config_with_fallthrough(zones: Vec<String>) -> DnsConfig {
    DnsConfig {
        fallthrough: Some(zones),
        ..test_dns_config()
    }
}

// --- Directory builder ---

/// Builds the tailnet used across integration tests:
///
/// - `web-1` and `web-2` with one address of each family
/// - `db` with an IPv4 address only
/// - `www` aliased to both web nodes
pub fn test_directory() -> Directory {
    let mut dir = Directory::new();
    dir.add_v4("web-1", "100.64.0.1".parse().unwrap());
    dir.add_v6("web-1", "fd7a:115c:a1e0::1".parse().unwrap());
    dir.add_v4("web-2", "100.64.0.2".parse().unwrap());
    dir.add_v6("web-2", "fd7a:115c:a1e0::2".parse().unwrap());
    dir.add_v4("db", "100.64.0.3".parse().unwrap());
    dir.add_alias("www", format!("web-1.{}.", ZONE));
    dir.add_alias("www", format!("web-2.{}.", ZONE));
    dir
}

pub fn test_store() -> DirectoryStore {
    let store = DirectoryStore::new();
    store.publish(test_directory());
    store
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a tailnet client address.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "100.64.0.100:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Build a Catalog serving the zone, with optional chained authorities.
pub fn build_catalog(
    config: DnsConfig,
    store: DirectoryStore,
    chained: Vec<Arc<dyn AuthorityObject>>,
) -> Catalog {
    server::build_catalog(config, store, chained).expect("failed to build catalog")
}

// --- Response helpers ---

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(
    catalog: &Catalog,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

/// Record types in the authority section.
pub fn name_server_types(msg: &Message) -> Vec<RecordType> {
    msg.name_servers().iter().map(|r| r.record_type()).collect()
}

/// Extract A addresses from the answer section.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract AAAA addresses from the answer section.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// Extract CNAME targets from the answer section.
pub fn extract_cname_targets(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::CNAME(cname) => Some(cname.0.to_string()),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
