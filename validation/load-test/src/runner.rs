//! Worker scheduling and load test orchestration.

use crate::config::{RequestDelay, TestConfig};
use crate::executor::{Executor, HttpTransport, RetryPolicy, Transport};
use crate::materializer::{CompiledEndpoint, TestPlan};
use crate::metrics::{Aggregator, RequestOutcome, RunSummary, TestResults};
use anyhow::Context;
use chrono::Utc;
use datagen::Registry;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Cooperative stop flag shared by the runner and every worker.
///
/// Workers check it before each request and wake from pacing sleeps as soon
/// as it is raised. Requests already in flight are left to finish.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless stopped first. Returns whether the stop
    /// was raised.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        let tx = &self.tx;
        let rx = &mut self.rx;
        tokio::select! {
            _ = tokio::time::sleep(duration) => *tx.borrow(),
            _ = rx.wait_for(|stopped| *stopped) => true,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-worker pacing settings.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    interval: Option<Duration>,
    request_delay: Option<RequestDelay>,
}

impl Pacing {
    fn from_config(config: &TestConfig) -> Self {
        Self {
            interval: config.rate_limit.map(|rps| Duration::from_secs_f64(1.0 / rps)),
            request_delay: config.request_delay,
        }
    }

    fn delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match self.request_delay {
            Some(RequestDelay::Fixed(secs)) => Duration::from_secs_f64(secs),
            Some(RequestDelay::Uniform { min, max }) if max > min => {
                Duration::from_secs_f64(rng.gen_range(min..=max))
            }
            Some(RequestDelay::Uniform { min, .. }) => Duration::from_secs_f64(min),
            None => Duration::ZERO,
        }
    }
}

/// State owned by one worker task for one run.
struct Worker<T> {
    id: u32,
    run: u32,
    registry: Arc<Registry>,
    endpoints: Arc<Vec<CompiledEndpoint>>,
    executor: Executor<T>,
    aggregator: Arc<Aggregator>,
    stop: StopSignal,
    progress: ProgressBar,
    pacing: Pacing,
    requests_per_endpoint: u32,
    default_timeout: Duration,
    include_request_details: bool,
}

impl<T: Transport> Worker<T> {
    /// Issue this worker's share of one run, then flush its outcomes.
    async fn run(mut self, mut rng: StdRng) {
        let mut buffer =
            Vec::with_capacity(self.endpoints.len() * self.requests_per_endpoint as usize);
        let mut last_start: Option<Instant> = None;

        'endpoints: for endpoint in self.endpoints.iter() {
            for issued in 0..self.requests_per_endpoint {
                if let (Some(interval), Some(last)) = (self.pacing.interval, last_start) {
                    let elapsed = last.elapsed();
                    if elapsed < interval && self.stop.sleep(interval - elapsed).await {
                        break 'endpoints;
                    }
                }
                if self.stop.is_stopped() {
                    break 'endpoints;
                }
                last_start = Some(Instant::now());

                let request = match endpoint.materialize(&self.registry, &mut rng) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(
                            endpoint = %endpoint.name,
                            run = self.run,
                            worker = self.id,
                            error = %e,
                            "Failed to generate request, skipping endpoint for this run"
                        );
                        self.aggregator
                            .record_generation_error(&endpoint.name, self.run, e.to_string())
                            .await;
                        self.progress.inc((self.requests_per_endpoint - issued) as u64);
                        continue 'endpoints;
                    }
                };

                let timeout = endpoint.timeout.unwrap_or(self.default_timeout);
                let execution = self.executor.execute(&request, timeout).await;
                let mut outcome = RequestOutcome::new(&endpoint.name, self.run, self.id, execution);
                if self.include_request_details {
                    outcome.request = Some(request);
                }
                buffer.push(outcome);
                self.progress.inc(1);

                let pause = self.pacing.delay(&mut rng) + endpoint.delay.unwrap_or_default();
                if self.stop.sleep(pause).await {
                    break 'endpoints;
                }
            }
        }

        debug!(worker = self.id, run = self.run, outcomes = buffer.len(), "Worker finished");
        self.aggregator.record_batch(buffer).await;
    }
}

/// Leave the bar where it stopped when cancelled, otherwise mark it complete.
fn finish_progress(progress: &ProgressBar, cancelled: bool) {
    if cancelled {
        progress.abandon_with_message("Cancelled");
    } else {
        progress.finish_with_message("Complete!");
    }
}

/// Executes load tests with a fixed pool of workers per run.
pub struct LoadRunner<T = HttpTransport> {
    config: TestConfig,
    scenario: Option<String>,
    plan: TestPlan,
    executor: Executor<T>,
    aggregator: Arc<Aggregator>,
    stop: StopSignal,
    show_progress: bool,
}

impl LoadRunner<HttpTransport> {
    /// Create a runner that talks HTTP to `config.base_url`.
    pub fn new(config: TestConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.num_workers as usize)
            .context("failed to create HTTP client")?;
        Self::with_transport(config, Arc::new(transport))
    }
}

impl<T: Transport> LoadRunner<T> {
    /// Validate the configuration and compile the test plan.
    pub fn with_transport(config: TestConfig, transport: Arc<T>) -> anyhow::Result<Self> {
        config.validate()?;
        let plan = TestPlan::compile(&config)?;
        let executor = Executor::new(
            transport,
            RetryPolicy::new(config.max_retries, config.retry_delay()),
            config.report.include_response_body,
        );

        Ok(Self {
            config,
            scenario: None,
            plan,
            executor,
            aggregator: Arc::new(Aggregator::new()),
            stop: StopSignal::new(),
            show_progress: false,
        })
    }

    /// Label the results with the scenario that produced the config.
    pub fn with_scenario(mut self, scenario: Option<String>) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Handle for stopping the test from outside.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        self.aggregator.clone()
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(self.config.total_requests());
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    fn worker_rng(&self, run: u32, worker: u32) -> StdRng {
        match self.config.seed {
            Some(seed) => {
                let offset = run as u64 * self.config.num_workers as u64 + worker as u64;
                StdRng::seed_from_u64(seed.wrapping_add(offset))
            }
            None => StdRng::from_entropy(),
        }
    }

    /// Run every configured test run and collect the results.
    pub async fn run(&self) -> anyhow::Result<TestResults> {
        let config = &self.config;
        info!(
            name = %config.name,
            base_url = %config.base_url,
            workers = config.num_workers,
            requests_per_endpoint = config.requests_per_endpoint,
            runs = config.num_test_runs,
            endpoints = self.plan.endpoints.len(),
            "Starting load test"
        );

        let progress = self.progress_bar();
        let started_at = Utc::now();
        let start = Instant::now();
        let mut runs = Vec::with_capacity(config.num_test_runs as usize);
        let mut runs_completed = 0;

        for run in 0..config.num_test_runs {
            if self.stop.is_stopped() {
                break;
            }
            progress.set_message(format!("run {}/{}", run + 1, config.num_test_runs));
            let run_start = Instant::now();

            let handles = (0..config.num_workers).map(|id| {
                let worker = Worker {
                    id,
                    run,
                    registry: self.plan.registry.clone(),
                    endpoints: self.plan.endpoints.clone(),
                    executor: self.executor.clone(),
                    aggregator: self.aggregator.clone(),
                    stop: self.stop.clone(),
                    progress: progress.clone(),
                    pacing: Pacing::from_config(config),
                    requests_per_endpoint: config.requests_per_endpoint,
                    default_timeout: config.timeout(),
                    include_request_details: config.report.include_request_details,
                };
                tokio::spawn(worker.run(self.worker_rng(run, id)))
            });

            // Barrier: run k+1 starts only after every worker of run k returned
            for result in join_all(handles).await {
                if let Err(e) = result {
                    error!(run = run + 1, error = %e, "Worker task failed, its outcomes are lost");
                }
            }

            let mut reports = Vec::with_capacity(self.plan.endpoints.len());
            for endpoint in self.plan.endpoints.iter() {
                reports.push(self.aggregator.snapshot(&endpoint.name, run).await);
            }
            let summary =
                RunSummary::from_reports(run, run_start.elapsed().as_secs_f64(), &reports);
            info!(
                run = run + 1,
                requests = summary.total_requests,
                failed = summary.failed_requests,
                duration_secs = summary.duration_secs,
                "Run finished"
            );
            runs.push(summary);

            if self.stop.is_stopped() {
                warn!(run = run + 1, "Load test stopped");
                break;
            }
            runs_completed += 1;
        }

        finish_progress(&progress, self.stop.is_stopped());
        let duration_secs = start.elapsed().as_secs_f64();

        let reports = self.aggregator.reports().await;
        let total_requests: u64 = reports.iter().map(|r| r.total_requests).sum();
        let successful_requests: u64 = reports.iter().map(|r| r.successful_requests).sum();

        Ok(TestResults {
            name: config.name.clone(),
            scenario: self.scenario.clone(),
            base_url: config.base_url.clone(),
            timestamp: started_at,
            duration_secs,
            num_workers: config.num_workers,
            requests_per_endpoint: config.requests_per_endpoint,
            num_test_runs: config.num_test_runs,
            runs_completed,
            cancelled: self.stop.is_stopped(),
            total_requests,
            successful_requests,
            failed_requests: total_requests - successful_requests,
            requests_per_second: if duration_secs > 0.0 {
                total_requests as f64 / duration_secs
            } else {
                0.0
            },
            latency: self.aggregator.overall_latency().await,
            runs,
            reports,
            outcomes: if config.report.include_request_details {
                Some(self.aggregator.outcomes().await)
            } else {
                None
            },
        })
    }
}
