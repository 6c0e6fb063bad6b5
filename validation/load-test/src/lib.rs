//! Load testing framework for HTTP APIs.
//!
//! This crate provides tools to:
//! - Describe endpoints whose paths, params, headers and bodies carry
//!   generated data (see the `datagen` crate)
//! - Drive a fixed pool of workers through repeated test runs with pacing,
//!   retries and cooperative cancellation
//! - Collect per-endpoint, per-run statistics
//! - Output results in multiple formats (console, JSON, CSV)

pub mod config;
pub mod executor;
pub mod materializer;
pub mod metrics;
pub mod report;
pub mod runner;

pub use config::{EndpointConfig, ReportConfig, RequestDelay, ScenarioConfig, TestConfig};
pub use executor::{
    Execution, Executor, HttpTransport, OutcomeKind, RetryPolicy, Step, Transport,
    TransportError, TransportResponse,
};
pub use materializer::{CompiledEndpoint, ConcreteRequest, RequestBody, TestPlan};
pub use metrics::{Aggregator, LatencyStats, RequestOutcome, RunReport, RunSummary, TestResults};
pub use report::ResultsReport;
pub use runner::{LoadRunner, StopSignal};
