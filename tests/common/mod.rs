//! Shared test infrastructure for chaos injection integration tests.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use chaos_dns::registry::{ChaosRegistry, ChaosRule, FaultAction, PodRef};
use chaos_dns::resolver::StaticPodResolver;

// --- Constants ---

/// Address the stub upstream answers with, so tests can tell a forwarded
/// response from an injected one.
pub const UPSTREAM_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RequestHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
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
        self.try_into_message()
            .expect("no response was captured")
    }

    /// Like `into_message`, but `None` when nothing was written to the wire.
    pub fn try_into_message(self) -> Option<Message> {
        let buf = self.buf.lock().unwrap();
        if buf.is_empty() {
            return None;
        }
        Some(Message::from_vec(&buf).expect("failed to parse captured DNS response"))
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

// --- Stub upstream handler ---

/// End-of-chain handler standing in for the surrounding plugin dispatch:
/// answers every query with a fixed A record.
#[derive(Clone, Copy, Default)]
pub struct StubUpstream;

#[async_trait]
impl RequestHandler for StubUpstream {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let request_info = request
            .request_info()
            .expect("stub upstream expects a single-question query");
        let name = request_info.query.original().name().clone();

        let mut record = Record::from_rdata(name, 60, RData::A(A::from(UPSTREAM_IP)));
        record.set_dns_class(DNSClass::IN);
        let records = vec![record];

        let header = Header::response_from_request(request.header());
        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        response_handle
            .send_response(response)
            .await
            .expect("stub upstream failed to write response")
    }
}

// --- Registry builders ---

pub fn static_resolver(pods: &[(&str, &str, &str)]) -> Arc<StaticPodResolver> {
    let resolver = Arc::new(StaticPodResolver::new());
    for (ns, name, addr) in pods {
        resolver.set(ns, name, addr.parse().unwrap());
    }
    resolver
}

pub fn registry_with(pods: &[(&str, &str, &str)]) -> (ChaosRegistry, Arc<StaticPodResolver>) {
    let resolver = static_resolver(pods);
    (ChaosRegistry::new(resolver.clone()), resolver)
}

pub fn rule(
    name: &str,
    action: FaultAction,
    patterns: &[&str],
    targets: &[(&str, &str)],
) -> ChaosRule {
    ChaosRule {
        name: name.to_string(),
        action,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        targets: targets
            .iter()
            .map(|(ns, n)| PodRef::new(*ns, *n))
            .collect(),
    }
}

// --- Query/Request construction ---

pub fn src(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse::<IpAddr>().unwrap(), 12345)
}

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

/// Build a full `Request` with a crafted source address.
pub fn build_request(name: &str, record_type: RecordType, source: SocketAddr, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, source, Protocol::Udp)
}

// --- Response helpers ---

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
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

/// Assert a response is the stub upstream's fixed answer, i.e. the query was
/// forwarded rather than injected.
pub fn assert_forwarded(msg: &Message) {
    assert_response_code(msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(msg), vec![UPSTREAM_IP]);
}
