pub mod error;

pub use error::*;

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable naming the stack file directly
pub const STACK_PATH_ENV: &str = "STACKFLOW_STACK_PATH";

/// Project-local directory holding stack files and the run ledger
pub const PROJECT_DIR: &str = ".stackflow";

const CANDIDATES: [&str; 4] = [
    "stack.local.yaml",
    ".stack.local.yaml",
    "stack.yaml",
    ".stack.yaml",
];

/// Per-user Stackflow config directory, created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the project's stack file
///
/// Search order:
/// 1. `STACKFLOW_STACK_PATH` (direct path)
/// 2. current directory: stack.local.yaml, .stack.local.yaml, stack.yaml, .stack.yaml
/// 3. the same names under `./.stackflow/`
/// 4. `~/.config/stackflow/stack.yaml` (global)
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(stack_path) = std::env::var(STACK_PATH_ENV) {
        let path = PathBuf::from(stack_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = find_in(&current_dir) {
        return Ok(path);
    }

    let project_dir = current_dir.join(PROJECT_DIR);
    if project_dir.is_dir() {
        if let Some(path) = find_in(&project_dir) {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("stack.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Read and deserialize a YAML file
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::fs;

    /// Run `f` with the cwd set to `dir` and no stack path override
    fn in_dir<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = temp_env::with_var_unset(STACK_PATH_ENV, f);
        std::env::set_current_dir(original_dir).unwrap();
        result
    }

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("stackflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("stack.yaml"), "name: demo").unwrap();

        let found = in_dir(temp_dir.path(), find_stack_file).unwrap();
        assert!(found.ends_with("stack.yaml"));
    }

    #[test]
    #[serial]
    fn test_local_file_takes_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("stack.yaml"), "name: shared").unwrap();
        fs::write(temp_dir.path().join(".stack.local.yaml"), "name: local").unwrap();

        let found = in_dir(temp_dir.path(), find_stack_file).unwrap();
        assert!(found.ends_with(".stack.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_stack_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_dir = temp_dir.path().join(PROJECT_DIR);
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("stack.yaml"), "name: demo").unwrap();

        let found = in_dir(temp_dir.path(), find_stack_file).unwrap();
        assert!(found.ends_with(".stackflow/stack.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "name: custom").unwrap();
        fs::write(temp_dir.path().join("stack.yaml"), "name: demo").unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let found = temp_env::with_var(STACK_PATH_ENV, Some(&custom), find_stack_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert_eq!(found.unwrap(), custom);
    }

    #[test]
    #[serial]
    fn test_find_stack_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();

        // Only a global stack file could be found from an empty directory
        let global_exists = dirs::config_dir()
            .is_some_and(|dir| dir.join("stackflow").join("stack.yaml").exists());
        if global_exists {
            return;
        }

        let result = in_dir(temp_dir.path(), find_stack_file);
        assert!(matches!(result, Err(ConfigError::StackFileNotFound)));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    #[test]
    fn test_load_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stack.yaml");
        fs::write(&path, "name: demo\n").unwrap();

        let parsed: Named = load_yaml(&path).unwrap();
        assert_eq!(parsed, Named { name: "demo".into() });
    }

    #[test]
    fn test_load_yaml_reports_path_on_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        fs::write(&path, "name: [unterminated").unwrap();

        let err = load_yaml::<Named>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }
}
