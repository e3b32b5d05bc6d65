//! `warden`: reconcile guardrail policies and benchmark candidate models.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use warden_core::{
    benchmark_suite, write_artifact, BenchmarkArtifact, DeploymentArtifact, FailureReason,
    ModelSelector, ModelSpec, PolicyDefinition, PolicyRequest, RunStatus, VerificationReport,
    BENCHMARK_ARTIFACT, BENCHMARK_SUITE_VERSION, DEPLOYMENT_ARTIFACT, PASS_THRESHOLD,
};
use warden_runtime::{
    BenchmarkHarness, HttpPolicyStore, InMemoryPolicyStore, PolicyBinding, PolicyStore,
    PolicyVerifier, Reconciler, RuntimeConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Guardrail reconciliation and model benchmarking",
    long_about = "Warden keeps a remote guardrail policy in sync with a declarative\n\
                  definition, verifies it against adversarial prompts, and benchmarks\n\
                  candidate models to recommend one per usage category."
)]
struct Cli {
    /// Runtime configuration (YAML). Defaults apply when omitted.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a policy definition without contacting the store
    Validate {
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,

        /// Print the full request that reconcile would send
        #[arg(long)]
        json: bool,
    },

    /// Create or update a policy, wait until it is ready, then verify it
    Reconcile {
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,

        /// Store endpoint (overrides store.endpoint)
        #[arg(long)]
        endpoint: Option<String>,

        /// Reconcile against an in-process store
        #[arg(long, conflicts_with = "endpoint")]
        dry_run: bool,

        #[arg(short, long, default_value = DEPLOYMENT_ARTIFACT)]
        output: PathBuf,

        #[arg(long)]
        skip_verify: bool,

        /// Fail the run when the verification pass rate is below this
        #[arg(long, value_name = "RATE", value_parser = parse_pass_rate)]
        min_pass_rate: Option<f64>,

        /// Polling budget, e.g. `5m` (overrides reconcile.timeout)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Benchmark candidate models and recommend one per category
    Benchmark {
        /// Store endpoint (overrides store.endpoint)
        #[arg(long)]
        endpoint: Option<String>,

        /// Candidate as `<family>:<model-id>`; repeatable (overrides benchmark.models)
        #[arg(short, long = "model", value_name = "SPEC")]
        models: Vec<ModelSpec>,

        /// Invoke models through this policy
        #[arg(long)]
        policy_id: Option<String>,

        #[arg(long, default_value = "DRAFT")]
        policy_version: String,

        #[arg(short, long, default_value = BENCHMARK_ARTIFACT)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "warden failed");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warden=debug,warden_core=debug,warden_runtime=debug"
    } else {
        "warden=info,warden_core=info,warden_runtime=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Validate { definition, json } => validate(&definition, json, &config),
        Commands::Reconcile {
            definition,
            endpoint,
            dry_run,
            output,
            skip_verify,
            min_pass_rate,
            timeout,
        } => {
            let mut config = config;
            if let Some(timeout) = timeout {
                config.reconcile.timeout = timeout;
            }
            let min_pass_rate = min_pass_rate.or(config.verify.min_pass_rate);
            let store = if dry_run {
                Arc::new(InMemoryPolicyStore::new()) as Arc<dyn PolicyStore>
            } else {
                http_store(&config, endpoint)?
            };

            reconcile(
                store,
                &config,
                &definition,
                &output,
                skip_verify || dry_run,
                min_pass_rate,
            )
            .await
        }
        Commands::Benchmark {
            endpoint,
            models,
            policy_id,
            policy_version,
            output,
        } => {
            let store = http_store(&config, endpoint)?;
            let models = if models.is_empty() {
                config.benchmark.models.clone()
            } else {
                models
            };
            let binding = policy_id.map(|id| PolicyBinding::new(id, policy_version));

            benchmark(store, &config, &models, binding, &output).await
        }
    }
}

fn http_store(config: &RuntimeConfig, endpoint: Option<String>) -> Result<Arc<dyn PolicyStore>> {
    let mut store_config = config.store.clone();
    if endpoint.is_some() {
        store_config.endpoint = endpoint;
    }
    let store = HttpPolicyStore::from_config(&store_config).context("configuring policy store")?;
    Ok(Arc::new(store))
}

fn validate(path: &Path, json: bool, config: &RuntimeConfig) -> Result<ExitCode> {
    let definition = match PolicyDefinition::from_file(path) {
        Ok(definition) => definition,
        Err(err) => {
            eprintln!("✗ {}: {}", path.display(), err);
            return Ok(ExitCode::FAILURE);
        }
    };

    let request = PolicyRequest::from_definition(&definition, &config.reconcile.defaults());
    if json {
        println!("{}", serde_json::to_string_pretty(&request)?);
    } else {
        println!("✓ {} is valid (policy '{}')", path.display(), definition.name);
        let filters = request.content_policy_config.as_ref().map(|c| c.filters_config.len());
        let topics = request.topic_policy_config.as_ref().map(|t| t.topics_config.len());
        let entities = request
            .sensitive_information_policy_config
            .as_ref()
            .map(|s| s.pii_entities_config.len());

        println!("  content filters:  {}", group_len(filters));
        println!("  denied topics:    {}", group_len(topics));
        println!("  PII entities:     {}", group_len(entities));
    }
    Ok(ExitCode::SUCCESS)
}

fn group_len(len: Option<usize>) -> String {
    len.map_or_else(|| "none".to_string(), |n| n.to_string())
}

async fn reconcile(
    store: Arc<dyn PolicyStore>,
    config: &RuntimeConfig,
    path: &Path,
    output: &Path,
    skip_verify: bool,
    min_pass_rate: Option<f64>,
) -> Result<ExitCode> {
    let definition = match PolicyDefinition::from_file(path) {
        Ok(definition) => definition,
        Err(err) => {
            let artifact = DeploymentArtifact::failed(
                path.display().to_string(),
                FailureReason::new("config", err.to_string()),
            );
            return finish_deployment(output, &artifact);
        }
    };

    tracing::info!(policy = %definition.name, store = store.name(), "Reconciling");
    let reconciler = Reconciler::new(Arc::clone(&store), config.reconcile.clone());

    let resource = match reconciler.reconcile(&definition).await {
        Ok(resource) => resource,
        Err(err) => {
            let artifact = DeploymentArtifact::failed(&definition.name, err.failure_reason());
            return finish_deployment(output, &artifact);
        }
    };
    println!("✓ Policy '{}' ready ({})", definition.name, resource.id);

    if skip_verify {
        let artifact = DeploymentArtifact::succeeded(&definition.name, &resource.id, None);
        return finish_deployment(output, &artifact);
    }

    let report = PolicyVerifier::new(store, &config.verify)
        .verify(&resource.id)
        .await;
    print_verification(&report);

    let mut artifact =
        DeploymentArtifact::succeeded(&definition.name, &resource.id, Some(report.clone()));
    if let Some(min) = min_pass_rate {
        if !report.meets(min) {
            artifact.status = RunStatus::Failure;
            artifact.failure = Some(FailureReason::new(
                "verification_gate",
                format!(
                    "pass rate {:.0}% is below the required {:.0}%",
                    report.pass_rate * 100.0,
                    min * 100.0
                ),
            ));
        }
    }

    finish_deployment(output, &artifact)
}

fn print_verification(report: &VerificationReport) {
    println!(
        "  Verification: {}/{} blocked ({:.0}%)",
        report.blocked,
        report.total,
        report.pass_rate * 100.0
    );
    for gap in report.gaps() {
        println!("  ⚠ not blocked: {}", gap.prompt);
    }
}

fn finish_deployment(output: &Path, artifact: &DeploymentArtifact) -> Result<ExitCode> {
    write_artifact(output, artifact)
        .with_context(|| format!("writing {}", output.display()))?;

    match (&artifact.status, &artifact.failure) {
        (RunStatus::Failure, Some(failure)) => {
            eprintln!("✗ {} ({})", failure.message, failure.kind);
            for reason in &failure.reasons {
                eprintln!("  - {}", reason);
            }
            Ok(ExitCode::FAILURE)
        }
        (RunStatus::Failure, None) => Ok(ExitCode::FAILURE),
        (RunStatus::Success, _) => Ok(ExitCode::SUCCESS),
    }
}

async fn benchmark(
    store: Arc<dyn PolicyStore>,
    config: &RuntimeConfig,
    models: &[ModelSpec],
    binding: Option<PolicyBinding>,
    output: &Path,
) -> Result<ExitCode> {
    let mut harness = BenchmarkHarness::new(store, config.benchmark.params());
    if let Some(binding) = binding {
        harness = harness.with_policy(binding);
    }

    let reports = harness.run(models, &benchmark_suite()).await;
    let recommendation = ModelSelector::new().select(&reports);

    for report in reports.values() {
        let rate = report
            .success_rate
            .map_or_else(|| "n/a".to_string(), |r| format!("{:.0}%", r * 100.0));
        println!(
            "{} {} ({}): {}/{} passed, success rate {}, avg latency {:.2}s",
            if report.succeeded(PASS_THRESHOLD) { "✓" } else { "✗" },
            report.model_id,
            report.family,
            report.passed_cases,
            report.total_cases,
            rate,
            report.average_latency_secs
        );
    }
    for (category, model) in &recommendation.selections {
        println!("→ {}: {}", category, model);
    }

    let artifact = BenchmarkArtifact::new(BENCHMARK_SUITE_VERSION, reports, recommendation);
    write_artifact(output, &artifact).with_context(|| format!("writing {}", output.display()))?;

    Ok(match artifact.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Failure => {
            eprintln!("✗ No model reached a {:.0}% success rate", PASS_THRESHOLD * 100.0);
            ExitCode::FAILURE
        }
    })
}

/// A pass rate in `[0, 1]`.
fn parse_pass_rate(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} must be between 0 and 1"))
    }
}
