use std::path::PathBuf;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("fetch failed for branch '{branch}': {reason}")]
    Fetch { branch: String, reason: String },

    #[error("dependency step '{step}' failed: {reason}")]
    DependencyInstall { step: String, reason: String },

    #[error("manifest missing: {0}")]
    ManifestMissing(String),

    #[error("build verification failed for release {release}: {marker} not found")]
    BuildVerification { release: String, marker: PathBuf },

    #[error("activation failed: {0}")]
    Activation(String),

    #[error("release not found: {0}")]
    RollbackTargetNotFound(String),

    #[error("release directory already exists: {0}")]
    ReleaseCollision(String),

    #[error("another deploy holds the lock on {0}")]
    Locked(PathBuf),

    #[error("proxy configuration failed: {0}")]
    Proxy(String),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("command failed: {command} (exit code {code:?})")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command timed out after {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
