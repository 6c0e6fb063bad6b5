//! Results reporting and formatting.

use crate::metrics::TestResults;
use anyhow::Context;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::path::{Path, PathBuf};

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as console tables: a summary and one row per endpoint
    /// and run.
    pub fn format_table(results: &TestResults) -> String {
        let mut summary = Table::new();
        summary
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.name)]);

        if let Some(scenario) = &results.scenario {
            summary.add_row(vec!["Scenario:", scenario.as_str()]);
        }
        summary.add_row(vec!["Target:", results.base_url.as_str()]);
        summary.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        summary.add_row(vec![
            "Runs:",
            &format!("{}/{}", results.runs_completed, results.num_test_runs),
        ]);
        summary.add_row(vec!["Workers:", &results.num_workers.to_string()]);
        summary.add_row(vec![
            "Total Requests:",
            &results.total_requests.to_string(),
        ]);
        summary.add_row(vec![
            "Success Rate:",
            &format!("{:.1}%", results.success_rate()),
        ]);
        summary.add_row(vec![
            "Requests/sec:",
            &format!("{:.1}", results.requests_per_second),
        ]);

        summary.add_row(vec!["", ""]);
        summary.add_row(vec!["Latency (ms)", "p50 / p90 / p95 / p99 / max"]);
        summary.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
                results.latency.p50,
                results.latency.p90,
                results.latency.p95,
                results.latency.p99,
                results.latency.max
            ),
        ]);
        if results.cancelled {
            summary.add_row(vec!["", ""]);
            summary.add_row(vec!["Status:", "stopped before completion"]);
        }

        let mut runs = Table::new();
        runs.load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Run", "Endpoint", "Requests", "OK", "Failed", "Retries", "Mean ms", "p95 ms",
                "Errors",
            ]);
        for report in &results.reports {
            let errors = match &report.generation_error {
                Some(error) => format!("generation: {}", error),
                None => report
                    .errors
                    .iter()
                    .map(|(key, count)| format!("{}={}", key, count))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            runs.add_row(vec![
                (report.run + 1).to_string(),
                report.endpoint.clone(),
                report.total_requests.to_string(),
                report.successful_requests.to_string(),
                report.failed_requests.to_string(),
                report.total_retries.to_string(),
                format!("{:.1}", report.latency.mean),
                format!("{:.1}", report.latency.p95),
                errors,
            ]);
        }

        format!("{}\n{}", summary, runs)
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV rows, one per endpoint and run.
    pub fn format_csv(results: &TestResults) -> String {
        results
            .reports
            .iter()
            .map(|report| {
                format!(
                    "{},{},{},{},{},{},{},{:.1},{:.1},{:.1},{:.1}",
                    results.timestamp.to_rfc3339(),
                    csv_field(&results.name),
                    report.run + 1,
                    csv_field(&report.endpoint),
                    report.total_requests,
                    report.successful_requests,
                    report.failed_requests,
                    report.latency.mean,
                    report.latency.p50,
                    report.latency.p95,
                    report.latency.p99
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,test,run,endpoint,requests,successful,failed,mean_ms,p50_ms,p95_ms,p99_ms"
    }

    /// Write the JSON results into `dir` as `performance_report_<timestamp>.json`.
    pub fn write_json(results: &TestResults, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let path = dir.join(format!(
            "performance_report_{}.json",
            results.timestamp.format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&path, Self::format_json(results)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
