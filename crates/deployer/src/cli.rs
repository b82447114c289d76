//! Command-line interface for the deployer

use crate::config::ConfigLocator;
use crate::runtime::{SchedulerConfig, UnsatisfiedPolicy};
use argh::FromArgs;
use std::time::Duration;

/// Deploy units in dependency order, starting independent units concurrently
#[derive(FromArgs, Debug)]
pub struct DeployArgs {
    /// path to the deploy file (default: $DEPLOYER_CONFIG, ./deployer.json,
    /// then the packaged resources)
    #[argh(positional)]
    pub config: Option<String>,

    /// show deploy plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate deploy file and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// finish successfully even if some units can never be deployed
    #[argh(switch)]
    pub allow_unsatisfied: bool,

    /// abort deploys still in flight when one fails
    #[argh(switch)]
    pub cancel_on_failure: bool,

    /// upper bound for a single deploy, in milliseconds
    #[argh(option)]
    pub deploy_timeout_ms: Option<u64>,

    /// time given to each unit process to stop before it is killed, in
    /// milliseconds
    #[argh(option, default = "5000")]
    pub shutdown_grace_ms: u64,
}

impl DeployArgs {
    /// Scheduler settings selected on the command line
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            unsatisfied: if self.allow_unsatisfied {
                UnsatisfiedPolicy::Ignore
            } else {
                UnsatisfiedPolicy::Fail
            },
            cancel_on_failure: self.cancel_on_failure,
            deploy_timeout: self.deploy_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Locator for the deploy file; an explicit path wins over the environment
    pub fn locator(&self) -> ConfigLocator {
        match &self.config {
            Some(path) => ConfigLocator::new().with_path(path),
            None => ConfigLocator::from_env(),
        }
    }

    /// Grace period for stopping unit processes
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Log filter to use when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DeployArgs {
        DeployArgs::from_args(&["deployer"], args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.config.is_none());
        assert!(!args.dry_run);
        assert_eq!(args.log_filter(), "info");
        assert_eq!(args.shutdown_grace(), Duration::from_secs(5));

        let config = args.scheduler_config();
        assert_eq!(config.unsatisfied, UnsatisfiedPolicy::Fail);
        assert!(!config.cancel_on_failure);
        assert!(config.deploy_timeout.is_none());
    }

    #[test]
    fn test_scheduler_flags() {
        let args = parse(&[
            "deploy.yaml",
            "--allow-unsatisfied",
            "--cancel-on-failure",
            "--deploy-timeout-ms",
            "250",
        ]);
        assert_eq!(args.config.as_deref(), Some("deploy.yaml"));

        let config = args.scheduler_config();
        assert_eq!(config.unsatisfied, UnsatisfiedPolicy::Ignore);
        assert!(config.cancel_on_failure);
        assert_eq!(config.deploy_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_log_filter_falls_back_to_info() {
        assert_eq!(parse(&["-l", "DEBUG"]).log_filter(), "debug");
        assert_eq!(parse(&["-l", "verbose"]).log_filter(), "info");
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(DeployArgs::from_args(&["deployer"], &["--groups", "core"]).is_err());
    }
}
