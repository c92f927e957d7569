use super::{load_stack, print_report};
use colored::Colorize;
use stackflow_cloud::RunReport;
use std::path::Path;

pub async fn handle(file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let loaded = load_stack(file)?;
    let graph = loaded.stack.graph()?;
    let ledger = loaded.store().load().await?;
    let report = RunReport::current(&graph, &ledger);

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    if ledger.run == 0 {
        println!("{}", "No runs recorded yet".yellow());
    } else {
        println!("{} after run {}", loaded.stack.name.cyan(), ledger.run);
    }
    print_report(&report);
    println!();
    println!("{}", report.summary());
    Ok(())
}
