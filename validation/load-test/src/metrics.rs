//! Outcome collection and statistics.

use crate::executor::{Execution, OutcomeKind};
use crate::materializer::ConcreteRequest;
use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

/// One finished request, after retries.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub endpoint: String,
    pub run: u32,
    pub worker: u32,
    pub timestamp: DateTime<Utc>,
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub attempts: u32,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<ConcreteRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

impl RequestOutcome {
    pub fn new(endpoint: &str, run: u32, worker: u32, execution: Execution) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            run,
            worker,
            timestamp: Utc::now(),
            kind: execution.kind,
            status: execution.status,
            latency_ms: execution.latency.as_secs_f64() * 1000.0,
            attempts: execution.attempts,
            bytes: execution.bytes,
            error: execution.error,
            request: None,
            response_body: execution.body,
        }
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Key used in the error histogram: `kind` or `kind:status`.
    pub fn error_key(&self) -> String {
        match self.status {
            Some(status) => format!("{}:{}", self.kind, status),
            None => self.kind.to_string(),
        }
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    /// Fold latencies given in milliseconds.
    pub fn from_millis(latencies: impl IntoIterator<Item = f64>) -> Self {
        let Ok(mut histogram) = Histogram::<u64>::new(3) else {
            return Self::default();
        };
        for ms in latencies {
            histogram.record((ms * 1000.0).round() as u64).ok();
        }
        if histogram.is_empty() {
            return Self::default();
        }

        let ms = |us: u64| us as f64 / 1000.0;
        Self {
            count: histogram.len(),
            min: ms(histogram.min()),
            max: ms(histogram.max()),
            mean: histogram.mean() / 1000.0,
            p50: ms(histogram.value_at_percentile(50.0)),
            p75: ms(histogram.value_at_percentile(75.0)),
            p90: ms(histogram.value_at_percentile(90.0)),
            p95: ms(histogram.value_at_percentile(95.0)),
            p99: ms(histogram.value_at_percentile(99.0)),
        }
    }
}

/// Rollup of one endpoint in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub endpoint: String,
    pub run: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_retries: u64,
    pub errors: BTreeMap<String, u64>,
    /// Over successful requests only
    pub latency: LatencyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

impl RunReport {
    fn fold<'a>(
        endpoint: &str,
        run: u32,
        outcomes: impl Iterator<Item = &'a RequestOutcome>,
        generation_error: Option<String>,
    ) -> Self {
        let mut report = RunReport {
            endpoint: endpoint.to_string(),
            run,
            generation_error,
            ..Default::default()
        };
        let mut latencies = Vec::new();

        for outcome in outcomes {
            report.total_requests += 1;
            report.total_retries += outcome.retries() as u64;
            if outcome.kind.is_success() {
                report.successful_requests += 1;
                latencies.push(outcome.latency_ms);
            } else {
                report.failed_requests += 1;
                *report.errors.entry(outcome.error_key()).or_default() += 1;
            }
        }

        if report.total_requests > 0 {
            report.success_rate =
                report.successful_requests as f64 / report.total_requests as f64 * 100.0;
        }
        report.latency = LatencyStats::from_millis(latencies);
        report
    }
}

#[derive(Default)]
struct Store {
    outcomes: Vec<RequestOutcome>,
    generation_errors: HashMap<(String, u32), String>,
}

/// Shared, append-only outcome store.
///
/// Every mutation happens under one lock, so a snapshot sees each outcome
/// either completely or not at all.
#[derive(Default)]
pub struct Aggregator {
    store: Mutex<Store>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: RequestOutcome) {
        self.store.lock().await.outcomes.push(outcome);
    }

    /// Append a worker's buffered outcomes in one step.
    pub async fn record_batch(&self, outcomes: Vec<RequestOutcome>) {
        self.store.lock().await.outcomes.extend(outcomes);
    }

    /// Remember that `endpoint` could not be materialized in `run`.
    ///
    /// The first error per endpoint and run is kept.
    pub async fn record_generation_error(&self, endpoint: &str, run: u32, error: String) {
        self.store
            .lock()
            .await
            .generation_errors
            .entry((endpoint.to_string(), run))
            .or_insert(error);
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.outcomes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self, endpoint: &str, run: u32) -> RunReport {
        let store = self.store.lock().await;
        RunReport::fold(
            endpoint,
            run,
            store
                .outcomes
                .iter()
                .filter(|o| o.endpoint == endpoint && o.run == run),
            store
                .generation_errors
                .get(&(endpoint.to_string(), run))
                .cloned(),
        )
    }

    /// Reports for every (run, endpoint) pair seen so far, ordered by run and
    /// then endpoint name.
    pub async fn reports(&self) -> Vec<RunReport> {
        let store = self.store.lock().await;
        let keys: BTreeSet<(u32, &str)> = store
            .outcomes
            .iter()
            .map(|o| (o.run, o.endpoint.as_str()))
            .chain(
                store
                    .generation_errors
                    .keys()
                    .map(|(endpoint, run)| (*run, endpoint.as_str())),
            )
            .collect();

        keys.into_iter()
            .map(|(run, endpoint)| {
                RunReport::fold(
                    endpoint,
                    run,
                    store
                        .outcomes
                        .iter()
                        .filter(|o| o.endpoint == endpoint && o.run == run),
                    store
                        .generation_errors
                        .get(&(endpoint.to_string(), run))
                        .cloned(),
                )
            })
            .collect()
    }

    pub async fn outcomes(&self) -> Vec<RequestOutcome> {
        self.store.lock().await.outcomes.clone()
    }

    /// Latency over every successful request recorded so far.
    pub async fn overall_latency(&self) -> LatencyStats {
        let store = self.store.lock().await;
        LatencyStats::from_millis(
            store
                .outcomes
                .iter()
                .filter(|o| o.kind.is_success())
                .map(|o| o.latency_ms),
        )
    }
}

/// Totals for one run across all endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: u32,
    pub duration_secs: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl RunSummary {
    pub fn from_reports(run: u32, duration_secs: f64, reports: &[RunReport]) -> Self {
        let mut summary = RunSummary {
            run,
            duration_secs,
            ..Default::default()
        };
        for report in reports.iter().filter(|r| r.run == run) {
            summary.total_requests += report.total_requests;
            summary.successful_requests += report.successful_requests;
            summary.failed_requests += report.failed_requests;
        }
        summary
    }
}

/// Final test results handed to the report renderer.
#[derive(Debug, Clone, Serialize)]
pub struct TestResults {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub base_url: String,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub num_workers: u32,
    pub requests_per_endpoint: u32,
    pub num_test_runs: u32,
    pub runs_completed: u32,
    pub cancelled: bool,

    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub requests_per_second: f64,
    pub latency: LatencyStats,

    pub runs: Vec<RunSummary>,
    pub reports: Vec<RunReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<Vec<RequestOutcome>>,
}

impl TestResults {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}
