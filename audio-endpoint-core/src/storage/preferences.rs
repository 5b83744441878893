use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::error::AudioError;

/// User preferences persisted between runs as a small JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Last explicitly selected capture device. `None` follows the system default.
    #[serde(default)]
    pub last_device_id: Option<String>,
    /// RFC 3339 time of the last save.
    #[serde(default)]
    pub saved_at: Option<String>,
}

impl Preferences {
    /// Read preferences from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AudioError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No preferences at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AudioError::InvalidArgument(format!(
                    "failed to read preferences {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&json).map_err(|e| {
            AudioError::InvalidArgument(format!("failed to parse preferences {}: {}", path.display(), e))
        })
    }

    /// Stamp `saved_at` and write to `path`, creating parent directories.
    pub fn save(&mut self, path: &Path) -> Result<(), AudioError> {
        self.saved_at = Some(Utc::now().to_rfc3339());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AudioError::InvalidArgument(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AudioError::InvalidArgument(format!("failed to serialize preferences: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            AudioError::InvalidArgument(format!("failed to write preferences {}: {}", path.display(), e))
        })?;
        log::debug!("Preferences saved to {}", path.display());
        Ok(())
    }

    /// Whether `id` is the remembered device.
    pub fn prefers(&self, id: &str) -> bool {
        self.last_device_id.as_deref() == Some(id)
    }
}
