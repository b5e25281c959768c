//! Tester configuration
//!
//! Layered lowest to highest: built-in defaults, an optional config file,
//! `OPT_*` environment variables, then command-line flags.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tester_lib::{ConfigError, ConnectOptions, TestConfig};

pub const ENV_PREFIX: &str = "OPT";

/// Scheduler tester CLI
#[derive(Debug, Default, Parser)]
#[command(name = "scheduler-tester")]
#[command(about = "Measures how long the cluster takes to schedule a spread canary deployment", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Target Kubernetes namespace to create deployments in
    #[arg(long)]
    pub target_namespace: Option<String>,

    /// Container image to deploy
    #[arg(long)]
    pub image: Option<String>,

    /// Container arguments, comma separated
    #[arg(long)]
    pub args: Option<String>,

    /// Number of replicas to deploy
    #[arg(short, long)]
    pub replicas: Option<i32>,

    /// Seconds to wait for all replicas to become ready, at most 290
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Seconds to keep a ready canary running
    #[arg(long)]
    pub keep: Option<u64>,

    /// Seconds between cycle starts
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Container CPU limit, also used as the request
    #[arg(long)]
    pub cpu_limit: Option<String>,

    /// Container memory limit, also used as the request
    #[arg(long)]
    pub memory_limit: Option<String>,

    /// Port for the metrics and health endpoints
    #[arg(long)]
    pub prometheus_port: Option<u16>,

    /// Run one cycle and exit
    #[arg(short, long)]
    pub single: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Enable Kubernetes client debug and wire logging
    #[arg(short, long)]
    pub wirelog: bool,

    /// kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Explicit kubeconfig path
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Consecutive failed cycles before /healthz reports unhealthy
    #[arg(long)]
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target_namespace: Option<String>,
    pub image: String,
    /// Comma separated container arguments
    pub args: String,
    pub replicas: i32,
    pub timeout: u64,
    pub keep: u64,
    pub interval: u64,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub prometheus_port: u16,
    pub single: bool,
    pub debug: bool,
    pub wirelog: bool,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub log_format: LogFormat,
    pub failure_threshold: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_namespace: None,
            image: "gcr.io/projectcalico-org/node:v3.2.7".to_string(),
            args: "sleep,999".to_string(),
            replicas: 3,
            timeout: 30,
            keep: 1,
            interval: 30,
            cpu_limit: "100m".to_string(),
            memory_limit: "50Mi".to_string(),
            prometheus_port: 9999,
            single: false,
            debug: false,
            wirelog: false,
            context: None,
            kubeconfig: None,
            log_format: LogFormat::Json,
            failure_threshold: tester_lib::health::DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl Settings {
    /// Resolve settings from every layer using the process environment
    pub fn load(cli: &Cli) -> Result<Self, config::ConfigError> {
        Self::load_with_env(cli, None)
    }

    /// Resolve settings, reading `OPT_*` variables from `env` when given
    pub fn load_with_env(
        cli: &Cli,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        builder = builder
            .set_override_option("target_namespace", cli.target_namespace.clone())?
            .set_override_option("image", cli.image.clone())?
            .set_override_option("args", cli.args.clone())?
            .set_override_option("replicas", cli.replicas.map(i64::from))?
            .set_override_option("timeout", cli.timeout)?
            .set_override_option("keep", cli.keep)?
            .set_override_option("interval", cli.interval)?
            .set_override_option("cpu_limit", cli.cpu_limit.clone())?
            .set_override_option("memory_limit", cli.memory_limit.clone())?
            .set_override_option("prometheus_port", cli.prometheus_port.map(u64::from))?
            .set_override_option("single", cli.single.then_some(true))?
            .set_override_option("debug", cli.debug.then_some(true))?
            .set_override_option("wirelog", cli.wirelog.then_some(true))?
            .set_override_option("context", cli.context.clone())?
            .set_override_option(
                "kubeconfig",
                cli.kubeconfig
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )?
            .set_override_option("log_format", cli.log_format.map(|f| f.as_str()))?
            .set_override_option("failure_threshold", cli.failure_threshold.map(u64::from))?;

        builder.build()?.try_deserialize()
    }

    /// Per-cycle configuration, validated
    pub fn test_config(&self) -> Result<TestConfig, ConfigError> {
        let namespace = self
            .target_namespace
            .clone()
            .filter(|ns| !ns.trim().is_empty())
            .ok_or(ConfigError::MissingNamespace)?;

        let config = TestConfig {
            namespace,
            image: self.image.clone(),
            args: split_args(&self.args),
            replicas: self.replicas,
            timeout: Duration::from_secs(self.timeout),
            keep_alive: Duration::from_secs(self.keep),
            cpu_limit: self.cpu_limit.clone(),
            memory_limit: self.memory_limit.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Period between cycle starts
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::ZeroDuration("interval"));
        }
        Ok(Duration::from_secs(self.interval))
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            context: self.context.clone(),
            kubeconfig: self.kubeconfig.clone(),
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with_env(&Cli::default(), env(&[])).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.replicas, 3);
        assert_eq!(settings.prometheus_port, 9999);
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_namespace_is_required() {
        let settings = Settings::load_with_env(&Cli::default(), env(&[])).unwrap();

        assert_eq!(settings.test_config(), Err(ConfigError::MissingNamespace));
    }

    #[test]
    fn test_env_overrides_defaults() {
        let settings = Settings::load_with_env(
            &Cli::default(),
            env(&[
                ("OPT_TARGET_NAMESPACE", "probe"),
                ("OPT_REPLICAS", "5"),
                ("OPT_SINGLE", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.target_namespace.as_deref(), Some("probe"));
        assert_eq!(settings.replicas, 5);
        assert!(settings.single);
    }

    #[test]
    fn test_cli_overrides_env() {
        let cli = Cli::parse_from([
            "scheduler-tester",
            "--target-namespace",
            "from-cli",
            "-r",
            "7",
            "--log-format",
            "text",
            "-w",
        ]);
        let settings = Settings::load_with_env(
            &cli,
            env(&[("OPT_TARGET_NAMESPACE", "from-env"), ("OPT_REPLICAS", "5")]),
        )
        .unwrap();

        assert_eq!(settings.target_namespace.as_deref(), Some("from-cli"));
        assert_eq!(settings.replicas, 7);
        assert_eq!(settings.log_format, LogFormat::Text);
        assert!(settings.wirelog);
        assert!(!settings.debug);
    }

    #[test]
    fn test_config_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "target_namespace = \"from-file\"\ntimeout = 45\nargs = \"sleep,60\""
        )
        .unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            keep: Some(9),
            ..Default::default()
        };
        let settings = Settings::load_with_env(&cli, env(&[("OPT_TIMEOUT", "50")])).unwrap();

        assert_eq!(settings.target_namespace.as_deref(), Some("from-file"));
        assert_eq!(settings.timeout, 50);
        assert_eq!(settings.keep, 9);

        let test_config = settings.test_config().unwrap();
        assert_eq!(test_config.args, vec!["sleep", "60"]);
        assert_eq!(test_config.timeout, Duration::from_secs(50));
        assert_eq!(test_config.keep_alive, Duration::from_secs(9));
    }

    #[test]
    fn test_validation() {
        let settings = Settings {
            target_namespace: Some("probe".to_string()),
            replicas: 0,
            ..Default::default()
        };
        assert_eq!(settings.test_config(), Err(ConfigError::InvalidReplicas(0)));

        let settings = Settings {
            target_namespace: Some("probe".to_string()),
            args: " , ".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.test_config(), Err(ConfigError::Empty("args")));

        let settings = Settings {
            target_namespace: Some("probe".to_string()),
            timeout: 600,
            ..Default::default()
        };
        assert_eq!(
            settings.test_config(),
            Err(ConfigError::TimeoutTooLong { got: 600, max: 290 })
        );

        let settings = Settings {
            interval: 0,
            ..Default::default()
        };
        assert_eq!(settings.interval(), Err(ConfigError::ZeroDuration("interval")));
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("sleep,999"), vec!["sleep", "999"]);
        assert_eq!(split_args("/bin/sh, -c ,true"), vec!["/bin/sh", "-c", "true"]);
    }
}
