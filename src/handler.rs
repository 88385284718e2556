//! Per-query chaos interception.
//!
//! `ChaosHandler` sits at the front of a DNS handler chain. Every query is
//! matched against the registry by its source address: if the sender is a
//! targeted pod and the queried name falls under the rule's patterns, the
//! configured fault is injected; everything else is delegated to the next
//! handler unmodified.

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::RecordType;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::iter;
use tracing::{debug, info, warn};

use crate::answer::{self, CHAOS_TTL};
use crate::error::ChaosDnsError;
use crate::metrics::{self, QueryOutcome, Timer};
use crate::registry::{ChaosRegistry, FaultAction, PodBinding};

/// DNS request interceptor with fall-through to an optional next handler.
pub struct ChaosHandler<N> {
    registry: ChaosRegistry,
    next: Option<N>,
}

impl<N> ChaosHandler<N> {
    /// Handler at the end of the chain: queries chaos does not claim are
    /// answered SERVFAIL.
    pub fn new(registry: ChaosRegistry) -> Self {
        Self {
            registry,
            next: None,
        }
    }

    /// Handler that delegates unclaimed queries to `next`.
    pub fn with_next(registry: ChaosRegistry, next: N) -> Self {
        Self {
            registry,
            next: Some(next),
        }
    }

    /// The registry this handler reads.
    pub fn registry(&self) -> &ChaosRegistry {
        &self.registry
    }
}

impl<N: RequestHandler> ChaosHandler<N> {
    /// Handle one query.
    ///
    /// On the error-injection path `serve` itself writes nothing and the
    /// returned error carries the chaos reason; the caller is responsible
    /// for answering the client with SERVFAIL. All other paths either write
    /// a response or delegate to the next handler.
    pub async fn serve<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, ChaosDnsError> {
        let source_ip = request.src().ip();

        // Chaos is only defined for well-formed single-question queries.
        let Ok(request_info) = request.request_info() else {
            return self.forward(request, response_handle).await;
        };
        let qname = request_info.query.name().to_string();
        debug!(source = %source_ip, qname = %qname, "received query");

        let Some(binding) = self.registry.lookup(source_ip) else {
            return self.forward(request, response_handle).await;
        };
        // Stale bindings are refreshed off the request path; this query
        // still runs against the snapshot.
        self.registry.maybe_refresh(&binding);

        if !binding.matches(&qname) {
            return self.forward(request, response_handle).await;
        }

        self.inject(&binding, request, response_handle).await
    }

    async fn inject<R: ResponseHandler>(
        &self,
        binding: &PodBinding,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, ChaosDnsError> {
        if binding.action == FaultAction::Error {
            info!(
                namespace = %binding.namespace,
                pod = %binding.name,
                rule = %binding.rule,
                "injecting dns error fault"
            );
            metrics::record_injection("error");
            metrics::record_query(QueryOutcome::Injected);
            return Err(ChaosDnsError::FaultInjected {
                namespace: binding.namespace.clone(),
                name: binding.name.clone(),
                rule: binding.rule.clone(),
            });
        }

        let request_info = request.request_info()?;
        // The answer echoes the question with its original casing.
        let query_name = request_info.query.original().name().clone();
        let records = match request_info.query.query_type() {
            RecordType::A => answer::a_records(&query_name, CHAOS_TTL, &[answer::random_ipv4()]),
            RecordType::AAAA => {
                answer::aaaa_records(&query_name, CHAOS_TTL, &[answer::random_ipv6()])
            }
            // Random faults are only defined for address queries.
            _ => return self.forward(request, response_handle).await,
        };

        info!(
            namespace = %binding.namespace,
            pod = %binding.name,
            rule = %binding.rule,
            qname = %query_name,
            "injecting random address"
        );
        metrics::record_injection("random");
        metrics::record_query(QueryOutcome::Injected);

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            records.iter(),
            iter::empty(),
            iter::empty(),
            iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(sent) => Ok(sent),
            Err(error) => {
                // The response code stays coherent for the caller even when
                // the transport write fails.
                warn!(%error, "failed to write injected response");
                Ok(header.into())
            }
        }
    }

    async fn forward<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, ChaosDnsError> {
        match &self.next {
            Some(next) => {
                metrics::record_query(QueryOutcome::Forwarded);
                Ok(next.handle_request(request, response_handle).await)
            }
            None => Err(ChaosDnsError::NoNextHandler),
        }
    }

    /// Answer the client with a header-only SERVFAIL reply.
    async fn serve_failed<R: ResponseHandler>(
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::ServFail);
        let response =
            MessageResponseBuilder::from_message_request(request).build_no_records(header);

        match response_handle.send_response(response).await {
            Ok(sent) => sent,
            Err(error) => {
                warn!(%error, "failed to write SERVFAIL response");
                header.into()
            }
        }
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for ChaosHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let result = self.serve(request, response_handle.clone()).await;
        metrics::record_query_duration(timer.elapsed());

        match result {
            Ok(sent) => sent,
            Err(error @ ChaosDnsError::FaultInjected { .. }) => {
                debug!(%error, "served injected failure");
                Self::serve_failed(request, response_handle).await
            }
            Err(error) => {
                warn!(%error, "query handling failed");
                metrics::record_query(QueryOutcome::Failed);
                Self::serve_failed(request, response_handle).await
            }
        }
    }
}
