//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the recording and replay service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory recordings are saved under
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// HTTP API address
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_http_addr() -> String {
    "0.0.0.0:9092".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            recordings_dir: default_recordings_dir(),
            http_addr: default_http_addr(),
        }
    }
}

impl ServiceConfig {
    /// Set the save directory
    pub fn with_recordings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.recordings_dir = dir.into();
        self
    }

    /// Set the HTTP API address
    pub fn with_http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }
}
