use std::path::PathBuf;

/// Process-level settings, read from the environment once at startup.
///
/// | variable | default | meaning |
/// |---|---|---|
/// | GYMD_LOG | info | tracing filter directive |
/// | GYMD_LOG_JSON | false | JSON log lines on stderr |
/// | GYMD_WORKSPACE | (none) | workspace opened before the first request |
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub log_json: bool,
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_filter: get("GYMD_LOG")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "info".into()),
            log_json: get("GYMD_LOG_JSON")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            workspace: get("GYMD_WORKSPACE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}
