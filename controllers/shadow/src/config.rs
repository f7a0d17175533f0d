//! Controller configuration.
//!
//! Flags with environment fallbacks. Durations are taken as plain integers
//! and converted on access.

use crate::backoff::ExponentialBackoff;
use crate::error::ControllerError;
use clap::Parser;
use std::net::SocketAddr;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "shadow-controller")]
#[command(about = "Keeps one Pod per Shadow resource in existence")]
#[command(version)]
pub struct Config {
    /// Path to a kubeconfig file. Without it, `KUBECONFIG` (a path list) is
    /// honoured, then ~/.kube/config; when neither exists the in-cluster
    /// configuration is used.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to watch. All namespaces when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Number of concurrent reconcile workers.
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Initial retry delay in milliseconds.
    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 5)]
    pub backoff_base_ms: u64,

    /// Retry delay cap in seconds.
    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = 1000)]
    pub backoff_max_secs: u64,

    /// Drop a key after this many consecutive failures. Unbounded when unset.
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Seconds to wait for the initial cache sync before giving up.
    #[arg(long, env = "CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub cache_sync_timeout_secs: u64,

    /// Seconds in-flight reconciles get to finish on shutdown.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Bind address of the metrics and probe server.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Emit logs as JSON.
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Checks values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.backoff_base() > self.backoff_max() {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff base ({:?}) exceeds backoff max ({:?})",
                self.backoff_base(),
                self.backoff_max()
            )));
        }
        Ok(())
    }

    /// Kubeconfig file to load, if any.
    ///
    /// `None` leaves discovery to `kube::Config::infer`, which reads the
    /// `KUBECONFIG` path list and falls back to in-cluster configuration.
    pub fn kubeconfig_path(&self) -> Result<Option<PathBuf>, ControllerError> {
        resolve_kubeconfig(
            self.kubeconfig.as_deref(),
            std::env::var_os("KUBECONFIG"),
            home_dir(),
        )
    }

    /// Delay before the first retry.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Upper bound on any retry delay.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// Retry policy for the work queue.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base(), self.backoff_max())
    }

    /// How long the initial cache sync may take.
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    /// How long in-flight reconciles get on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// An explicit path must exist. A set `KUBECONFIG` defers to inference;
/// otherwise `<home>/.kube/config` is used when present.
fn resolve_kubeconfig(
    explicit: Option<&Path>,
    kubeconfig_env: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<Option<PathBuf>, ControllerError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ControllerError::InvalidConfig(format!(
            "kubeconfig {} does not exist",
            path.display()
        )));
    }
    if kubeconfig_env.is_some_and(|value| !value.is_empty()) {
        return Ok(None);
    }
    Ok(home
        .map(|home| home.join(".kube").join("config"))
        .filter(|path| path.exists()))
}

/// `$HOME`, with `$USERPROFILE` standing in when it is unset
fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(|var| std::env::var_os(var))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["shadow-controller"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--namespace",
            "team-a",
            "--workers",
            "4",
            "--backoff-base-ms",
            "10",
            "--backoff-max-secs",
            "30",
            "--max-retries",
            "5",
            "--metrics-addr",
            "127.0.0.1:9090",
            "--log-json",
        ]);

        assert_eq!(config.namespace.as_deref(), Some("team-a"));
        assert_eq!(config.workers, 4);
        assert_eq!(
            config.backoff(),
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(30))
        );
        assert_eq!(config.max_retries, Some(5));
        assert_eq!(config.metrics_addr, "127.0.0.1:9090".parse().unwrap());
        assert!(config.log_json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = parse(&["--workers", "0"]);
        assert!(matches!(
            config.validate(),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_base_above_max() {
        let config = parse(&["--backoff-base-ms", "5000", "--backoff-max-secs", "1"]);
        assert!(matches!(
            config.validate(),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_explicit_kubeconfig_is_an_error() {
        let config = parse(&["--kubeconfig", "/nonexistent/shadow/kubeconfig"]);
        assert!(config.kubeconfig_path().is_err());
    }

    #[test]
    fn test_kubeconfig_path_list_defers_to_inference() {
        let dir = std::env::temp_dir().join(format!("shadow-kubeconfig-{}", std::process::id()));
        let first = dir.join("a");
        let second = dir.join("b");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&first, "").unwrap();
        std::fs::write(&second, "").unwrap();
        let list = std::env::join_paths([&first, &second]).unwrap();

        let resolved = resolve_kubeconfig(None, Some(list), None);

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(resolved, Ok(None)));
    }

    #[test]
    fn test_kubeconfig_falls_back_to_home() {
        let home = std::env::temp_dir().join(format!("shadow-home-{}", std::process::id()));
        let kube_dir = home.join(".kube");
        std::fs::create_dir_all(&kube_dir).unwrap();
        std::fs::write(kube_dir.join("config"), "").unwrap();

        let resolved = resolve_kubeconfig(None, None, Some(home.clone())).unwrap();
        let without_file = resolve_kubeconfig(None, None, Some(home.join("elsewhere"))).unwrap();

        std::fs::remove_dir_all(&home).unwrap();
        assert_eq!(resolved, Some(kube_dir.join("config")));
        assert_eq!(without_file, None);
    }

    #[test]
    fn test_rejects_malformed_metrics_addr() {
        let argv = ["shadow-controller", "--metrics-addr", "not-an-address"];
        assert!(Config::try_parse_from(argv).is_err());
    }
}
