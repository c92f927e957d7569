use colored::Colorize;
use stackflow_cloud::{WebAppParams, web_app_stack};

const STACK_FILE: &str = "stack.yaml";

pub fn handle(force: bool) -> anyhow::Result<()> {
    let current_dir = std::env::current_dir()?;
    let path = current_dir.join(STACK_FILE);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let name = current_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("web-app");
    let stack = web_app_stack(name, &WebAppParams::default());
    std::fs::write(&path, stack.to_yaml()?)?;

    println!("{} {}", "✓ Wrote".green(), path.display().to_string().cyan());
    println!("  {} resources; replace the placeholder IDs before provisioning", stack.resources.len());
    Ok(())
}
