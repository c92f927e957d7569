use super::load_stack;
use colored::Colorize;
use std::path::Path;

pub fn handle(file: Option<&Path>) -> anyhow::Result<()> {
    let loaded = load_stack(file)?;
    let graph = loaded.stack.graph()?;

    println!("Provisioning order for {}:", loaded.stack.name.cyan());
    for (index, name) in graph.order().iter().enumerate() {
        let kind = graph
            .descriptor(name)
            .map(|d| d.kind.to_string())
            .unwrap_or_default();
        println!("{:>4}. {} ({})", index + 1, name.cyan(), kind);

        let dependencies: Vec<&str> = graph.dependencies(name).map(String::as_str).collect();
        if !dependencies.is_empty() {
            println!("        after: {}", dependencies.join(", ").dimmed());
        }
    }
    Ok(())
}
