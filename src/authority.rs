//! Hickory DNS authority backed by the tailnet directory.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, CNAME, NS, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::DnsConfig;
use crate::directory::DirectoryStore;
use crate::metrics::{self, Timer};
use crate::policy::{Answer, Decision, Fallthrough, ResponsePolicy};
use crate::resolver::{RecordData, RecordKind, Resolver, ResourceRecord};

/// Authority for the tailnet zone.
///
/// Misses inside a fallthrough zone return [`LookupControlFlow::Skip`], so the
/// next authority registered for the same origin in the `Catalog` answers.
pub struct TailnetAuthority {
    origin: LowerName,
    store: DirectoryStore,
    policy: ResponsePolicy,
    config: Arc<DnsConfig>,
}

impl TailnetAuthority {
    /// Create a new authority for the given configuration and store.
    pub fn new(config: DnsConfig, store: DirectoryStore) -> Result<Self, hickory_proto::ProtoError> {
        let mut origin = Name::from_ascii(&config.zone)?;
        // Query names are always absolute. The catalog only matches an
        // absolute origin.
        origin.set_fqdn(true);
        let origin = origin.into();
        let resolver = Resolver::new(store.clone(), config.ttl);
        let fallthrough = Fallthrough::from_config(config.fallthrough.as_deref());

        Ok(Self {
            origin,
            store,
            policy: ResponsePolicy::new(resolver, fallthrough),
            config: Arc::new(config),
        })
    }

    /// Convert resolved records into record sets, one per record.
    ///
    /// A `RecordSet` collapses identical records, so every record gets its own
    /// set to keep answer order and duplicates intact.
    fn build_record_sets(&self, records: &[ResourceRecord]) -> Vec<Arc<RecordSet>> {
        records
            .iter()
            .filter_map(|rr| {
                let owner = match Name::from_ascii(&rr.owner) {
                    Ok(name) => name,
                    Err(e) => {
                        debug!(owner = %rr.owner, error = %e, "skipping record with bad owner");
                        return None;
                    }
                };
                let (rtype, rdata) = match &rr.data {
                    RecordData::A(addr) => (RecordType::A, RData::A(A::from(*addr))),
                    RecordData::Aaaa(addr) => (RecordType::AAAA, RData::AAAA(AAAA::from(*addr))),
                    RecordData::Cname(target) => match Name::from_ascii(target) {
                        Ok(target) => (RecordType::CNAME, RData::CNAME(CNAME(target))),
                        Err(e) => {
                            debug!(target = %target, error = %e, "skipping alias with bad target");
                            return None;
                        }
                    },
                };

                let mut record_set = RecordSet::new(owner.clone(), rtype, 0);
                let mut record = Record::from_rdata(owner, rr.ttl, rdata);
                record.set_dns_class(DNSClass::IN);
                record_set.insert(record, 0);
                Some(Arc::new(record_set))
            })
            .collect()
    }

    /// Build the SOA record for this zone.
    fn build_soa_record(&self) -> RecordSet {
        let soa = SOA::new(
            Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root()),
            Name::from_ascii(&self.config.soa.rname).unwrap_or_else(|_| Name::root()),
            self.store.serial(),
            self.config.soa.refresh as i32,
            self.config.soa.retry as i32,
            self.config.soa.expire as i32,
            self.config.soa.minimum,
        );

        let name = Name::from(self.origin.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::SOA, 0);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    /// Build an NS record for this zone.
    fn build_ns_record(&self) -> RecordSet {
        let name = Name::from(self.origin.clone());
        let ns_name = Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root());

        let mut record_set = RecordSet::new(name.clone(), RecordType::NS, 0);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::NS(NS(ns_name)));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    /// Answer a query for `name`.
    ///
    /// `original` is the query name as the client spelled it and becomes the
    /// owner of the answer records.
    fn respond(
        &self,
        name: &LowerName,
        original: &Name,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<LookupRecords> {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();
        let query_name = original.to_string();

        trace!(name = %query_name, rtype = %rtype_str, "DNS lookup");

        if self.is_apex(name) {
            let (result, flow) = self.respond_apex(rtype, lookup_options);
            metrics::record_query(&rtype_str, result, timer.elapsed());
            return flow;
        }

        let answer = match rtype {
            RecordType::A => self.policy.build_answer(&query_name, RecordKind::A),
            RecordType::AAAA => self.policy.build_answer(&query_name, RecordKind::Aaaa),
            RecordType::CNAME => self.policy.build_answer(&query_name, RecordKind::Cname),
            _ => {
                trace!(name = %query_name, rtype = %rtype_str, "unsupported record type");
                self.policy.miss(&query_name)
            }
        };

        metrics::record_query(&rtype_str, answer.decision.as_str(), timer.elapsed());
        self.control_flow(answer, lookup_options)
    }

    fn control_flow(
        &self,
        answer: Answer,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<LookupRecords> {
        match answer.decision {
            Decision::Answer => {
                metrics::record_records_returned(answer.records.len());
                let record_sets = self.build_record_sets(&answer.records);
                LookupControlFlow::Break(Ok(LookupRecords::many(lookup_options, record_sets)))
            }
            Decision::NotFound => {
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
            }
            Decision::Delegate => LookupControlFlow::Skip,
        }
    }

    fn is_apex(&self, name: &LowerName) -> bool {
        name.num_labels() == self.origin.num_labels() && self.origin.zone_of(name)
    }

    /// SOA and NS at the zone apex. Other types there have no data.
    ///
    /// Returns the metrics label alongside the lookup.
    fn respond_apex(
        &self,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> (&'static str, LookupControlFlow<LookupRecords>) {
        let record_set = match rtype {
            RecordType::SOA => self.build_soa_record(),
            RecordType::NS => self.build_ns_record(),
            _ => {
                trace!(rtype = %rtype, "no apex data for record type");
                return (
                    "nodata",
                    LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError))),
                );
            }
        };
        debug!(rtype = %rtype, "apex lookup");
        (
            Decision::Answer.as_str(),
            LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, Arc::new(record_set)))),
        )
    }
}

#[async_trait]
impl Authority for TailnetAuthority {
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
        self.respond(name, &Name::from(name.clone()), rtype, lookup_options)
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let query = request_info.query;
        self.respond(
            query.name(),
            query.original().name(),
            query.query_type(),
            lookup_options,
        )
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
