use super::load_stack;
use colored::Colorize;
use stackflow_cloud::ResourceKind;
use std::path::Path;

pub fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "Validating stack...".blue());

    let loaded = load_stack(file)?;
    println!("Stack file: {}", loaded.path.display().to_string().cyan());

    match loaded.stack.graph() {
        Ok(graph) => {
            println!("{}", "✓ Stack is valid".green().bold());
            println!();
            println!("Summary:");
            println!("  {}: {} resources", loaded.stack.name.cyan(), graph.len());
            for kind in ResourceKind::ALL {
                let count = graph.descriptors().by_kind(kind).len();
                if count > 0 {
                    println!("    - {}: {}", kind, count);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Invalid stack".red().bold());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
