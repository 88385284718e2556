//! Chaos DNS - DNS-level fault injection for container clusters.
//!
//! A control plane submits named rules saying "for these pods, when they
//! resolve names matching these patterns, inject this fault". The DNS server
//! identifies the pod behind every query by the packet's source address and
//! either rewrites the response (SERVFAIL or a randomized bogus address) or
//! delegates the query to the next handler in the chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          chaos-dns                             │
//! │                                                                │
//! │  ┌────────────────┐ install/cancel ┌───────────────────┐       │
//! │  │ Control server │───────────────▶│   Rule registry   │       │
//! │  │  (TCP :9288)   │                │ (name/target/IP)  │       │
//! │  └────────────────┘                └─────────┬─────────┘       │
//! │                                       lookup │ by source IP    │
//! │  ┌────────────────┐                ┌─────────▼─────────┐       │
//! │  │  Pod resolver  │◀── refresh ────│   Chaos handler   │◀─ UDP │
//! │  │ (cluster API)  │                │  inject / forward │   TCP │
//! │  └────────────────┘                └─────────┬─────────┘       │
//! │                                              ▼                 │
//! │                                        next handler            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Query flow
//!
//! ```text
//! query from 10.0.0.5 for "kubernetes.default.svc.cluster.local."
//!   → registry lookup by source IP
//!   → binding found, pattern set matches the name
//!   → action "error":  SERVFAIL, nothing written
//!     action "random": authoritative answer, one random A/AAAA, TTL 10
//!   → otherwise: fall through to the next handler
//! ```

#![warn(missing_docs)]

pub mod answer;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod selector;
pub mod server;
pub mod telemetry;

// Re-export main types
pub use config::{Config, ControlConfig, DnsConfig, KubernetesConfig, TelemetryConfig};
pub use error::ChaosDnsError;
pub use handler::ChaosHandler;
pub use registry::{ChaosRegistry, ChaosRule, FaultAction, PodBinding, PodRef};
pub use server::ChaosDnsServer;
