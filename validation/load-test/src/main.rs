//! Load test CLI for HTTP APIs with generated request data.

use anyhow::Result;
use api_load_test::{LoadRunner, ResultsReport, TestConfig, TestPlan};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "api-load-test")]
#[command(about = "Load testing tool for HTTP APIs with dynamic test data", long_about = None)]
struct Cli {
    /// Log level
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test from a config file
    Run {
        /// Path to config YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory for the JSON report
        #[arg(short, long, default_value = "reports")]
        output: PathBuf,

        /// Scenario to apply over the global settings
        #[arg(short, long)]
        scenario: Option<String>,

        /// Console format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Check a config file and compile every template
    Validate {
        /// Path to config YAML file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// List scenarios defined in a config file
    Scenarios {
        /// Path to config YAML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_tracing(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: &Path, scenario: Option<&str>) -> Result<TestConfig> {
    let config = TestConfig::from_file(path)?;
    match scenario {
        Some(name) => config.with_scenario(name),
        None => Ok(config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    match cli.command {
        Commands::Run {
            config,
            output,
            scenario,
            format,
            no_progress,
        } => {
            info!(config = %config.display(), scenario = ?scenario, "Loading configuration");
            let test_config = load_config(&config, scenario.as_deref())?;

            let runner = LoadRunner::new(test_config)?
                .with_scenario(scenario)
                .with_progress(!no_progress);

            let stop = runner.stop_signal();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received Ctrl+C, finishing in-flight requests");
                    stop.stop();
                }
            });

            let results = runner.run().await?;

            match format.as_str() {
                "json" => println!("{}", ResultsReport::format_json(&results)?),
                "csv" => {
                    println!("{}", ResultsReport::csv_header());
                    println!("{}", ResultsReport::format_csv(&results));
                }
                _ => println!("{}", ResultsReport::format_table(&results)),
            }

            let path = ResultsReport::write_json(&results, &output)?;
            info!(path = %path.display(), "Report written");
            Ok(())
        }
        Commands::Validate { config } => {
            let test_config = TestConfig::from_file(&config)?;
            test_config.validate()?;
            TestPlan::compile(&test_config)?;
            for name in test_config.scenarios.keys() {
                let scenario = test_config.with_scenario(name)?;
                scenario.validate()?;
            }

            println!("✓ Configuration is valid");
            println!("  Name: {}", test_config.name);
            println!("  Endpoints: {}", test_config.endpoints.len());
            println!("  Scenarios: {}", test_config.scenarios.len());
            println!("  Total requests: {}", test_config.total_requests());
            Ok(())
        }
        Commands::Scenarios { config } => {
            let test_config = TestConfig::from_file(&config)?;
            if test_config.scenarios.is_empty() {
                println!("No scenarios defined in {}", config.display());
                return Ok(());
            }

            println!("Available scenarios:");
            for (name, scenario) in &test_config.scenarios {
                let total = test_config.with_scenario(name)?.total_requests();
                println!("  {} - {} ({} requests)", name, scenario.description, total);
            }
            Ok(())
        }
    }
}
