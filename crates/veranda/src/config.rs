//! Environment-driven panel configuration.
//!
//! Every knob has a `VERANDA_*` override; unset variables fall back to the
//! stock Debian/Ubuntu defaults. Invalid numeric or boolean overrides are
//! errors, never silent fallbacks.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use veranda_protocol::defaults;
use veranda_provision::ProvisionConfig;

/// Panel configuration. The core crates receive these values as plain
/// constructor parameters.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Directory holding panel state.
    pub data_dir: PathBuf,
    /// Path of the state snapshot file.
    pub state_path: PathBuf,
    /// Apply provisioning changes for real; false means dry-run.
    pub provision_apply: bool,
    pub nginx_available_dir: PathBuf,
    pub nginx_enabled_dir: PathBuf,
    pub nginx_test_command: String,
    pub nginx_reload_command: String,
    /// Timeout for each external nginx command.
    pub command_timeout: Duration,
    /// How long shutdown waits for the in-flight job.
    pub shutdown_timeout: Duration,
    /// Bounded capacity of the job queue.
    pub job_queue_capacity: usize,
}

impl PanelConfig {
    pub fn load_from_env() -> Result<Self> {
        let data_dir = PathBuf::from(env_or("VERANDA_DATA_DIR", defaults::DATA_DIR));
        let state_path = match env_opt("VERANDA_STATE_PATH") {
            Some(path) => PathBuf::from(path),
            None => data_dir.join(defaults::STATE_FILE),
        };

        let mut cfg = Self {
            data_dir,
            state_path,
            // Applying nginx changes only makes sense on the target OS;
            // everywhere else the default is dry-run.
            provision_apply: cfg!(target_os = "linux"),
            nginx_available_dir: PathBuf::from(env_or(
                "VERANDA_NGINX_SITES_AVAILABLE_DIR",
                defaults::NGINX_AVAILABLE_DIR,
            )),
            nginx_enabled_dir: PathBuf::from(env_or(
                "VERANDA_NGINX_SITES_ENABLED_DIR",
                defaults::NGINX_ENABLED_DIR,
            )),
            nginx_test_command: env_or("VERANDA_NGINX_TEST_COMMAND", defaults::NGINX_TEST_COMMAND),
            nginx_reload_command: env_or(
                "VERANDA_NGINX_RELOAD_COMMAND",
                defaults::NGINX_RELOAD_COMMAND,
            ),
            command_timeout: Duration::from_secs(defaults::COMMAND_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(defaults::SHUTDOWN_TIMEOUT_SECS),
            job_queue_capacity: defaults::JOB_QUEUE_CAPACITY,
        };

        if let Some(raw) = env_opt("VERANDA_PROVISION_APPLY") {
            match raw.parse::<bool>() {
                Ok(apply) => cfg.provision_apply = apply,
                Err(_) => bail!("invalid VERANDA_PROVISION_APPLY: {raw:?}"),
            }
        }
        if let Some(raw) = env_opt("VERANDA_COMMAND_TIMEOUT_SECS") {
            cfg.command_timeout =
                Duration::from_secs(parse_positive(&raw, "VERANDA_COMMAND_TIMEOUT_SECS")?);
        }
        if let Some(raw) = env_opt("VERANDA_SHUTDOWN_SECS") {
            cfg.shutdown_timeout =
                Duration::from_secs(parse_positive(&raw, "VERANDA_SHUTDOWN_SECS")?);
        }
        if let Some(raw) = env_opt("VERANDA_JOB_QUEUE_CAPACITY") {
            cfg.job_queue_capacity =
                parse_positive(&raw, "VERANDA_JOB_QUEUE_CAPACITY")? as usize;
        }

        Ok(cfg)
    }

    /// Provisioner constructor parameters derived from this config.
    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            apply: self.provision_apply,
            available_dir: self.nginx_available_dir.clone(),
            enabled_dir: self.nginx_enabled_dir.clone(),
            test_command: self.nginx_test_command.clone(),
            reload_command: self.nginx_reload_command.clone(),
            command_timeout: self.command_timeout,
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env_opt(key).unwrap_or_else(|| fallback.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn parse_positive(raw: &str, key: &str) -> Result<u64> {
    match raw.parse::<u64>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => bail!("invalid {key}: {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment access is process-global, so everything lives in one test.
    #[test]
    fn test_env_overrides_and_validation() {
        std::env::set_var("VERANDA_DATA_DIR", "/tmp/veranda-test");
        std::env::set_var("VERANDA_NGINX_TEST_COMMAND", "true");
        std::env::set_var("VERANDA_PROVISION_APPLY", "false");
        std::env::set_var("VERANDA_SHUTDOWN_SECS", "3");

        let cfg = PanelConfig::load_from_env().unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/veranda-test"));
        assert_eq!(
            cfg.state_path,
            PathBuf::from("/tmp/veranda-test").join(defaults::STATE_FILE)
        );
        assert_eq!(cfg.nginx_test_command, "true");
        assert!(!cfg.provision_apply);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(3));

        std::env::set_var("VERANDA_SHUTDOWN_SECS", "0");
        assert!(PanelConfig::load_from_env().is_err());
        std::env::set_var("VERANDA_SHUTDOWN_SECS", "nope");
        assert!(PanelConfig::load_from_env().is_err());
        std::env::remove_var("VERANDA_SHUTDOWN_SECS");

        std::env::set_var("VERANDA_PROVISION_APPLY", "maybe");
        assert!(PanelConfig::load_from_env().is_err());
        std::env::remove_var("VERANDA_PROVISION_APPLY");

        std::env::remove_var("VERANDA_DATA_DIR");
        std::env::remove_var("VERANDA_NGINX_TEST_COMMAND");
    }
}
