// CLI commands for running and inspecting the judge
use anyhow::{Context, Result};
use arbiter_common::types::{EvaluationReport, LanguageTag, Submission};
use arbiter_engine::classifier::builtin_signatures;
use arbiter_engine::{Classifier, DockerSandbox, EngineConfig, Judge};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Logs go to stderr so reports on stdout stay machine-readable.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if std::env::var("ARBITER_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn read_submission(path: &Path) -> Result<Submission> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse submission {}", path.display()))
}

/// Judge one submission and print its report as JSON
pub async fn judge(
    config_path: Option<&Path>,
    submission_path: &Path,
    language: Option<&str>,
    show_audit: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut submission = read_submission(submission_path)?;
    if let Some(language) = language {
        submission.language_hint = Some(LanguageTag::new(language));
    }

    let sandbox = DockerSandbox::connect().context("Docker daemon is not reachable")?;
    let judge = Judge::from_config(&config, Arc::new(sandbox))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠️  Interrupted, cancelling evaluation...");
            on_signal.cancel();
        }
    });

    let id = submission.id;
    let report = judge.evaluate(submission, cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    print_summary(&report);

    if show_audit {
        eprintln!("\n📋 Audit trail:");
        for entry in judge.audit().trail(id) {
            eprintln!(
                "  {} {:<12} {}",
                entry.at.format("%H:%M:%S%.3f"),
                entry.stage.to_string(),
                entry.detail
            );
        }
    }
    Ok(())
}

fn print_summary(report: &EvaluationReport) {
    eprintln!(
        "\n⚖️  {:?} ({}) score {} | {}/{} passed in {}ms",
        report.verdict,
        report.language,
        report.score,
        report.passed_count(),
        report.test_results.len(),
        report.elapsed_ms
    );
    if !report.diagnostic.is_empty() {
        eprintln!("   {}", report.diagnostic.lines().next().unwrap_or_default());
    }
}

/// Print the language the classifier assigns to a file
pub fn classify(config_path: Option<&Path>, file: &Path) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let classifier = classifier_for(config_path)?;
    println!("{}", classifier.classify(&source));
    Ok(())
}

/// An explicit config must load; the default one may be absent, in which
/// case the built-in signature table is used.
fn classifier_for(config_path: Option<&Path>) -> Result<Classifier> {
    let config = match config_path {
        Some(_) => load_config(config_path)?,
        None => match load_config(None) {
            Ok(config) => config,
            Err(_) => return Ok(Classifier::builtin()),
        },
    };
    Ok(Classifier::new(
        config.classifier.clone().unwrap_or_else(builtin_signatures),
        config.default_language(),
    ))
}

pub fn list_languages(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!(
        "{:<12} {:<10} {:<26} {:>8} {:>6} {:>9} {:>10}",
        "LANGUAGE", "RUNNER", "IMAGE", "MEM(MB)", "CPU", "CPU(ms)", "WALL(ms)"
    );
    for lang in &config.languages {
        println!(
            "{:<12} {:<10} {:<26} {:>8} {:>6} {:>9} {:>10}",
            lang.tag().as_str(),
            lang.runner,
            lang.image,
            lang.memory_limit_mb,
            lang.cpu_limit,
            lang.limits.cpu_time_ms,
            lang.limits.wall_clock_ms
        );
    }
    Ok(())
}

pub fn check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("✅ Configuration is valid");
    println!("   pool size:        {}", config.pool_size);
    println!("   partial factor:   {}", config.partial_factor);
    println!("   parallel cases:   {}", config.max_parallel_cases);
    println!("   system retries:   {}", config.system_retries);
    println!("   languages:        {}", config.list_languages().join(", "));
    let signatures = config
        .classifier
        .as_ref()
        .map_or("built-in".to_string(), |s| format!("{} custom", s.len()));
    println!("   classifier:       {}", signatures);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shipped_config() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/arbiter.json")
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let missing = Path::new("/nonexistent/arbiter.json");
        assert!(classifier_for(Some(missing)).is_err());
    }

    #[test]
    fn test_explicit_config_is_used() {
        let classifier = classifier_for(Some(shipped_config().as_path())).unwrap();
        let tag = classifier.classify("def main():\n    print(input())\n");
        assert_eq!(tag.as_str(), "python");
    }
}
