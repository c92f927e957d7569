use super::{load_stack, print_report};
use crate::dry_run::{DryRunGateway, DryRunSink};
use colored::Colorize;
use stackflow_cloud::{ProvisioningEngine, RollbackPolicy, RunStatus, SinkRoutedGateway};
use std::path::Path;
use std::sync::Arc;

/// Command-line overrides of the stack's engine settings
#[derive(Debug, Default)]
pub struct UpOptions {
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
    pub destroy_on_failure: bool,
    pub force_unlock: bool,
}

/// Run the stack through the dry-run gateway; returns whether every
/// resource ended Ready
pub async fn handle(file: Option<&Path>, options: UpOptions) -> anyhow::Result<bool> {
    let loaded = load_stack(file)?;
    let graph = loaded.stack.graph()?;

    let mut config = loaded.stack.settings.clone();
    if let Some(concurrency) = options.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout) = options.timeout {
        config.run_timeout_secs = Some(timeout);
    }
    if options.destroy_on_failure {
        config.rollback = RollbackPolicy::DestroyOnFailure;
    }

    println!(
        "{} {} ({} resources, up to {} at once)",
        "Provisioning".blue(),
        loaded.stack.name.cyan(),
        graph.len(),
        config.worker_limit()
    );

    let store = loaded.store();
    if options.force_unlock && store.force_unlock().await? {
        println!("{}", "Removed existing ledger lock".yellow());
    }

    let sink = Arc::new(DryRunSink::default());
    let gateway = Arc::new(SinkRoutedGateway::new(Arc::new(DryRunGateway::new()), sink.clone()));
    let engine = ProvisioningEngine::new(gateway, config)
        .with_notifications(sink)
        .with_store(store);

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted: finishing in-flight resources...".yellow());
            token.cancel();
        }
    });

    let report = engine.resume(&graph).await?;

    println!();
    print_report(&report);
    println!();
    if report.notifications_published + report.notifications_failed > 0 {
        println!(
            "Notifications: {} published, {} failed",
            report.notifications_published, report.notifications_failed
        );
    }
    let headline = match report.status {
        RunStatus::Success => format!("✓ {}", report.status).green().bold(),
        RunStatus::PartialFailure => format!("! {}", report.status).yellow().bold(),
        RunStatus::Failure => format!("✗ {}", report.status).red().bold(),
    };
    println!("{} ({})", headline, report.summary());

    Ok(report.status.is_success())
}
