use std::error::Error;
use std::path::PathBuf;

use colored::Colorize;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use llm_gateway::{LlmGatewayConfig, LlmService};
use review_engine::inputs::{Collaborators, FsFileLoader, NoDiagnostics, NoSnippets};
use review_engine::types::Severity;
use review_engine::{ReviewContext, ReviewRootRequest, has_repo_marker, review_roots};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env when present.
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,review_engine=info"))
        .unwrap();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // Roots come from REVIEW_ROOTS (colon-separated, default "."); changed
    // files are the CLI arguments, attributed to the root they live under.
    let roots: Vec<PathBuf> = std::env::var("REVIEW_ROOTS")
        .map(|v| v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
        .unwrap_or_else(|_| vec![PathBuf::from(".")]);
    let changed: Vec<String> = std::env::args().skip(1).collect();
    if changed.is_empty() {
        eprintln!("usage: review-backend <changed-file>...  (roots via REVIEW_ROOTS)");
        std::process::exit(2);
    }

    let ctx = ReviewContext::from_env(roots[0].clone());
    let backend = LlmService::from_config(LlmGatewayConfig::from_env()?)?;

    let loader = FsFileLoader;
    let snippets = NoSnippets;
    let diagnostics = NoDiagnostics;
    let io = Collaborators {
        loader: &loader,
        snippets: &snippets,
        diagnostics: &diagnostics,
    };

    let requests = assign_changed(&roots, &changed);
    let outcome = review_roots(requests, &ctx, &backend, &io, has_repo_marker).await?;

    for finding in outcome
        .errors
        .iter()
        .chain(outcome.warnings.iter())
        .chain(outcome.infos.iter())
    {
        let severity = match finding.severity {
            Severity::Error => "error".red(),
            Severity::Warning => "warning".yellow(),
            Severity::Info => "info".blue(),
        };
        println!(
            "{}:{}:{} {} [{}] {}",
            finding.file, finding.line, finding.column, severity, finding.rule, finding.message
        );
    }

    let verdict = if outcome.passed {
        "review passed".green()
    } else {
        "review failed".red()
    };
    println!(
        "{} ({} errors, {} warnings, {} infos across {} roots)",
        verdict,
        outcome.errors.len(),
        outcome.warnings.len(),
        outcome.infos.len(),
        outcome.roots.len()
    );

    std::process::exit(if outcome.passed { 0 } else { 1 });
}

/// Assigns each changed path to the roots that contain it. Paths already
/// under a root are kept as-is; bare relative paths are joined against each
/// root they exist in.
fn assign_changed(roots: &[PathBuf], changed: &[String]) -> Vec<ReviewRootRequest> {
    roots
        .iter()
        .map(|root| {
            let files = changed
                .iter()
                .filter_map(|arg| {
                    let path = PathBuf::from(arg);
                    if path.starts_with(root) {
                        Some(path)
                    } else if root.join(&path).exists() {
                        Some(root.join(&path))
                    } else {
                        None
                    }
                })
                .collect();
            ReviewRootRequest {
                root: root.clone(),
                changed: files,
            }
        })
        .collect()
}
