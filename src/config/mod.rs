//! Layered configuration: built-in defaults, then `crmcore.toml`, then
//! `CRMCORE_*` environment variables.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Uploads above this size are rejected before becoming attachments.
    pub max_attachment_bytes: u64,
    /// Window for suppressing identical notifications.
    pub notification_dedup_secs: i64,
    /// Window for suppressing repeated task reminders.
    pub reminder_dedup_secs: i64,
    /// Snapshot file the JSON store flushes to.
    pub data_path: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            notification_dedup_secs: 5,
            reminder_dedup_secs: 3600,
            data_path: PathBuf::from("crmcore.json"),
        }
    }
}

impl CoreConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = Figment::from(Serialized::defaults(CoreConfig::default()))
            .merge(Toml::file("crmcore.toml"))
            .merge(Env::prefixed("CRMCORE_"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cap_attachments_at_5_mib() {
        let config = CoreConfig::default();
        assert_eq!(config.max_attachment_bytes, 5 * 1024 * 1024);
        assert_eq!(config.notification_dedup_secs, 5);
        assert_eq!(config.reminder_dedup_secs, 3600);
    }
}
