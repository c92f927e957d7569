pub mod init;
pub mod order;
pub mod status;
pub mod up;
pub mod validate;

use anyhow::Context;
use colored::Colorize;
use stackflow_cloud::{LedgerStore, ResourceStatus, RunReport, StackFile};
use std::path::{Path, PathBuf};

/// A loaded stack file and the project it belongs to
pub struct LoadedStack {
    pub path: PathBuf,
    pub root: PathBuf,
    pub stack: StackFile,
}

impl LoadedStack {
    /// Ledger store from `settings.ledger_dir`, or `<root>/.stackflow`
    pub fn store(&self) -> LedgerStore {
        match &self.stack.settings.ledger_dir {
            Some(dir) if dir.is_absolute() => LedgerStore::new(dir),
            Some(dir) => LedgerStore::new(self.root.join(dir)),
            None => LedgerStore::for_project(&self.root),
        }
    }
}

/// Load the stack from `file`, or discover it from the current directory
pub fn load_stack(file: Option<&Path>) -> anyhow::Result<LoadedStack> {
    let path = match file {
        Some(path) => path.to_path_buf(),
        None => stackflow_config::find_stack_file()?,
    };
    let stack: StackFile = stackflow_config::load_yaml(&path)
        .with_context(|| format!("Failed to load stack file {}", path.display()))?;

    let root = project_root(&path);
    tracing::debug!(path = %path.display(), root = %root.display(), "Loaded stack file");
    Ok(LoadedStack { path, root, stack })
}

/// Directory holding the stack file; a file inside `.stackflow/` belongs
/// to the directory above it
fn project_root(stack_path: &Path) -> PathBuf {
    let parent = stack_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if parent.file_name().is_some_and(|n| n == stackflow_config::PROJECT_DIR) {
        if let Some(root) = parent.parent() {
            return root.to_path_buf();
        }
    }
    parent.to_path_buf()
}

pub fn colored_status(status: ResourceStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        ResourceStatus::Ready => label.green(),
        ResourceStatus::Failed => label.red(),
        ResourceStatus::Skipped | ResourceStatus::RolledBack => label.yellow(),
        ResourceStatus::Pending | ResourceStatus::InProgress => label.dimmed(),
    }
}

pub fn print_report(report: &RunReport) {
    for resource in &report.resources {
        println!(
            "  {:<12} {} ({})",
            colored_status(resource.status),
            resource.name.cyan(),
            resource.kind
        );
        if let Some(id) = &resource.physical_id {
            println!("               id: {}", id);
        }
        if resource.status != ResourceStatus::Ready {
            if let Some(error) = &resource.last_error {
                println!("               {}", error.dimmed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_root_of_plain_file() {
        assert_eq!(project_root(Path::new("/srv/app/stack.yaml")), Path::new("/srv/app"));
        assert_eq!(project_root(Path::new("stack.yaml")), Path::new("."));
    }

    #[test]
    fn test_project_root_of_file_in_project_dir() {
        assert_eq!(
            project_root(Path::new("/srv/app/.stackflow/stack.yaml")),
            Path::new("/srv/app")
        );
    }
}
