use std::time::Duration;

use super::backoff::RetryPolicy;

const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 10_000;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_AUTOSAVE_SECS: u64 = 300;

/// Tunables shared by every session worker.
#[derive(Clone, Debug)]
pub struct SaveConfig {
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub retry_jitter: bool,
    pub upload_timeout: Duration,
    /// `None` disables the autosave ticker.
    pub autosave_interval: Option<Duration>,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES as u32,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            retry_jitter: true,
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            autosave_interval: Some(Duration::from_secs(DEFAULT_AUTOSAVE_SECS)),
        }
    }
}

impl SaveConfig {
    pub fn from_env() -> Self {
        let max_retries = read_u64_env("WOPISAVED_MAX_RETRIES", DEFAULT_MAX_RETRIES)
            .min(u64::from(u32::MAX)) as u32;
        let retry_base = Duration::from_millis(read_u64_env(
            "WOPISAVED_RETRY_BASE_MS",
            DEFAULT_RETRY_BASE_MS,
        ));
        let retry_max = Duration::from_millis(read_u64_env(
            "WOPISAVED_RETRY_MAX_MS",
            DEFAULT_RETRY_MAX_MS,
        ))
        .max(retry_base);
        let retry_jitter = read_bool_env("WOPISAVED_RETRY_JITTER", true);
        let upload_timeout = Duration::from_secs(read_u64_env(
            "WOPISAVED_UPLOAD_TIMEOUT_SECS",
            DEFAULT_UPLOAD_TIMEOUT_SECS,
        ));
        let autosave_secs = std::env::var("WOPISAVED_AUTOSAVE_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_AUTOSAVE_SECS);
        let autosave_interval = (autosave_secs > 0).then(|| Duration::from_secs(autosave_secs));

        Self {
            max_retries,
            retry_base,
            retry_max,
            retry_jitter,
            upload_timeout,
            autosave_interval,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base, self.retry_max)
            .with_jitter(self.retry_jitter)
    }
}

pub(crate) fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
