use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod model;
mod retriever;
mod service;

use app::{AppError, AppState};
use model::{Config, CveId};
use service::TriageOutcome;
use service::mistakes::MistakeCheckResult;
use service::triage::{AttemptRecord, MAX_ATTEMPTS, TriageError, build_prompt};

/// Triage a CVE with a locally hosted language model
#[derive(Parser, Debug)]
#[command(name = "cve-triage", version, about = "Triage a CVE with a local language model")]
struct Args {
    /// CVE identifier, e.g. CVE-2021-44228
    #[arg(long, value_name = "ID")]
    cve: CveId,

    /// Ollama model name (default: mistral:7b)
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// Number of indicator questions asked per coherence probe
    #[arg(long = "indicator-questions", value_name = "N")]
    indicator_questions: Option<usize>,

    /// Print the first-attempt prompt and exit without calling the model
    #[arg(long)]
    print_prompt: bool,

    /// Do not check the model runtime before triage
    #[arg(long)]
    skip_preflight: bool,

    /// Print the accepted model reply verbatim instead of the formatted verdict
    #[arg(long)]
    raw: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    // Logs go to stderr, stdout carries the verdict
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(model) = args.model {
        config.model.name = model;
    }
    if let Some(n) = args.indicator_questions {
        config.model.indicator_questions = n;
    }

    let state = AppState::new(config)?;

    tracing::info!(cve = %args.cve, model = %state.config.model.name, "Starting triage");

    let record = state.vulnerability_service.collect(&args.cve).await;

    if args.print_prompt {
        println!("{}", build_prompt(&record, 1)?);
        return Ok(());
    }

    if !args.skip_preflight {
        state.preflight().await;
    }

    match state.triage_service.triage(&record).await {
        Ok(outcome) if args.raw => println!("{}", outcome.reply.raw),
        Ok(outcome) => println!("{}", render_verdict(&outcome)),
        Err(e) => println!("{}", render_failure(&record.cve_id, &e)),
    }

    Ok(())
}

fn render_verdict(outcome: &TriageOutcome) -> String {
    let reply = &outcome.reply;
    let mut lines = vec![format!(
        "Accepted on attempt {} of {}",
        outcome.attempts.len(),
        MAX_ATTEMPTS
    )];

    let fields = [
        ("CVE", reply.cve()),
        ("Decision", reply.decision()),
        ("Justification", reply.justification()),
        ("Patch", Some(reply.patch().unwrap_or_else(|| "none".to_string()))),
        ("Priority", reply.priority()),
        ("Checks", reply.required_checks()),
        ("Mitigation", reply.mitigation()),
        ("Discrepancies", reply.discrepancies()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            lines.push(format!("{:<14} {}", format!("{}:", label), value));
        }
    }

    lines.push(String::new());
    lines.extend(render_attempts(&outcome.attempts));

    if let Some(object) = &reply.object
        && let Ok(json) = serde_json::to_string_pretty(object)
    {
        lines.push(String::new());
        lines.push(json);
    }

    lines.join("\n")
}

fn render_failure(cve_id: &CveId, error: &TriageError) -> String {
    let mut lines = vec![format!("Triage of {} failed: {}", cve_id, error)];

    if let TriageError::Exhausted { attempts } = error {
        lines.push(String::new());
        lines.extend(render_attempts(attempts));
    }

    lines.join("\n")
}

/// One line per attempt, followed by the indicator questions its probe asked
fn render_attempts(attempts: &[AttemptRecord]) -> Vec<String> {
    let mut lines = vec!["Attempts:".to_string()];

    for record in attempts {
        lines.push(format!(
            "  #{} {:<18} {} ms",
            record.attempt, record.outcome, record.elapsed_ms
        ));
        if let Some(probe) = &record.probe {
            lines.extend(render_probe(probe));
        }
    }

    lines
}

fn render_probe(probe: &MistakeCheckResult) -> impl Iterator<Item = String> + '_ {
    probe.results.iter().map(|result| {
        let status = if result.passed { "pass" } else { "FAIL" };
        format!("     [{}] {}", status, result.question)
    })
}
