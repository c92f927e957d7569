use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Stack file not found. Looked in:\n\
        - current directory: stack.local.yaml, .stack.local.yaml, stack.yaml, .stack.yaml\n\
        - ./.stackflow/ directory\n\
        - ~/.config/stackflow/stack.yaml\n\
        Set STACKFLOW_STACK_PATH to point at a file directly"
    )]
    StackFileNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
