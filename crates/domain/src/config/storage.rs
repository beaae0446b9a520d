use serde::{Deserialize, Serialize};

/// Storage location for the run log and snapshot (§6.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
        }
    }
}

fn d_state_dir() -> String {
    "./data".into()
}

/// Stale-run sweep default timeout, applied when a cleanup call omits the
/// `timeout_minutes` parameter (§4.4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaleRunConfig {
    #[serde(default = "d_timeout_minutes")]
    pub timeout_minutes_default: i64,
}

impl Default for StaleRunConfig {
    fn default() -> Self {
        Self {
            timeout_minutes_default: d_timeout_minutes(),
        }
    }
}

fn d_timeout_minutes() -> i64 {
    30
}
