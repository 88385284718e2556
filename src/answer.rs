//! Synthetic answer records for injected responses.

use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use std::net::{Ipv4Addr, Ipv6Addr};

/// TTL in seconds carried by injected answers.
pub const CHAOS_TTL: u32 = 10;

/// Build internet-class A records for `name`, one per address. The name is
/// used as-is so the original query casing is preserved.
pub fn a_records(name: &Name, ttl: u32, ips: &[Ipv4Addr]) -> Vec<Record> {
    ips.iter()
        .map(|ip| {
            let mut record = Record::from_rdata(name.clone(), ttl, RData::A(A::from(*ip)));
            record.set_dns_class(DNSClass::IN);
            record
        })
        .collect()
}

/// Build internet-class AAAA records for `name`, one per address.
pub fn aaaa_records(name: &Name, ttl: u32, ips: &[Ipv6Addr]) -> Vec<Record> {
    ips.iter()
        .map(|ip| {
            let mut record = Record::from_rdata(name.clone(), ttl, RData::AAAA(AAAA::from(*ip)));
            record.set_dns_class(DNSClass::IN);
            record
        })
        .collect()
}

/// A uniformly random IPv4 address.
pub fn random_ipv4() -> Ipv4Addr {
    Ipv4Addr::from(rand::random::<[u8; 4]>())
}

/// A uniformly random IPv6 address.
pub fn random_ipv6() -> Ipv6Addr {
    Ipv6Addr::from(rand::random::<[u8; 16]>())
}
