//! Wave scheduler - starts units concurrently as their dependencies complete
//!
//! A run owns the pending units and the deployed sequence. Every time a
//! deploy completes, the run re-evaluates which pending units have all of
//! their dependencies deployed and dispatches them as the next wave. All
//! bookkeeping happens on the loop in [`WaveScheduler::run`]; deploys run as
//! tasks in a [`JoinSet`] and only report back through it.

use crate::config::{merge, ConfigMap, UnitSpec};
use crate::runtime::adapter::{DeployAdapter, DeployError, DeployRequest, InstanceId};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// What to do when units remain whose dependencies can never be deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsatisfiedPolicy {
    /// Fail the run with [`SchedulerError::DependencyUnsatisfiable`]
    #[default]
    Fail,
    /// Finish the run successfully, leaving those units undeployed
    Ignore,
}

/// Wave scheduler configuration
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Handling of cycles and references to unknown units
    pub unsatisfied: UnsatisfiedPolicy,
    /// Abort in-flight deploys once the run has failed
    pub cancel_on_failure: bool,
    /// Upper bound for a single deploy call
    pub deploy_timeout: Option<Duration>,
}

/// Outcome of one deploy task
type DeployOutcome = (String, Result<InstanceId, String>);

/// Result of evaluating the run state
#[derive(Debug, PartialEq)]
enum Evaluation {
    /// Start these units now
    Dispatch(Vec<(String, UnitSpec)>),
    /// Nothing is ready yet, but deploys are in flight
    Wait,
    /// Every unit has been deployed
    Succeeded,
    /// No further progress is possible; these units are stuck
    Stalled(Vec<String>),
}

/// State of a single scheduling run
struct WaveRun {
    /// Units not yet selected into a wave
    pending: IndexMap<String, UnitSpec>,
    /// Ids in the order their deploy completed
    deployed: Vec<String>,
    deployed_set: HashSet<String>,
    /// Deploys dispatched but not yet completed
    in_flight: JoinSet<DeployOutcome>,
    waves: usize,
}

impl WaveRun {
    fn new(units: IndexMap<String, UnitSpec>) -> Self {
        Self {
            pending: units,
            deployed: Vec::new(),
            deployed_set: HashSet::new(),
            in_flight: JoinSet::new(),
            waves: 0,
        }
    }

    fn is_ready(&self, unit: &UnitSpec) -> bool {
        unit.depends_on
            .iter()
            .all(|dep| self.deployed_set.contains(dep))
    }

    /// Select every pending unit whose dependencies are all deployed
    fn evaluate(&mut self) -> Evaluation {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, unit)| self.is_ready(unit))
            .map(|(id, _)| id.clone())
            .collect();

        if !ready.is_empty() {
            let wave = ready
                .into_iter()
                .filter_map(|id| self.pending.shift_remove_entry(&id))
                .collect();
            return Evaluation::Dispatch(wave);
        }

        if !self.in_flight.is_empty() {
            return Evaluation::Wait;
        }

        if self.pending.is_empty() {
            Evaluation::Succeeded
        } else {
            let mut stuck: Vec<String> = self.pending.keys().cloned().collect();
            stuck.sort();
            Evaluation::Stalled(stuck)
        }
    }

    fn record_deployed(&mut self, id: String) {
        self.deployed_set.insert(id.clone());
        self.deployed.push(id);
    }
}

/// Dependency-ordered, concurrent unit scheduler
pub struct WaveScheduler {
    adapter: Arc<dyn DeployAdapter>,
    config: SchedulerConfig,
}

impl WaveScheduler {
    /// Create a scheduler deploying through `adapter`
    pub fn new(adapter: Arc<dyn DeployAdapter>) -> Self {
        Self {
            adapter,
            config: SchedulerConfig::default(),
        }
    }

    /// Replace the scheduler configuration
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Deploy all `units`, returning their ids in deploy-completion order.
    ///
    /// Fails on the first deploy failure. Units already started are not
    /// rolled back. Dropping the returned future aborts in-flight deploys.
    pub async fn run(
        &self,
        units: IndexMap<String, UnitSpec>,
        global: ConfigMap,
    ) -> Result<Vec<String>, SchedulerError> {
        let total = units.len();
        let mut run = WaveRun::new(units);

        loop {
            match run.evaluate() {
                Evaluation::Dispatch(wave) => {
                    run.waves += 1;
                    log::info!(
                        "Wave {}: deploying {} unit(s) ({} of {} deployed)",
                        run.waves,
                        wave.len(),
                        run.deployed.len(),
                        total
                    );
                    for (id, unit) in wave {
                        self.dispatch(&mut run.in_flight, id, unit, &global);
                    }
                    continue;
                }
                Evaluation::Wait => {}
                Evaluation::Succeeded => {
                    log::info!(
                        "All {} unit(s) deployed in {} wave(s)",
                        run.deployed.len(),
                        run.waves
                    );
                    return Ok(run.deployed);
                }
                Evaluation::Stalled(stuck) => {
                    return match self.config.unsatisfied {
                        UnsatisfiedPolicy::Fail => Err(SchedulerError::DependencyUnsatisfiable {
                            stuck,
                            started: run.deployed,
                        }),
                        UnsatisfiedPolicy::Ignore => {
                            log::warn!(
                                "Dependencies can never be satisfied, not deploying: {}",
                                stuck.join(", ")
                            );
                            Ok(run.deployed)
                        }
                    };
                }
            }

            let Some(joined) = run.in_flight.join_next().await else {
                continue;
            };

            match joined {
                Ok((id, Ok(instance))) => {
                    log::info!("[{}] Deployed as {}", id, instance);
                    run.record_deployed(id);
                }
                Ok((id, Err(cause))) => {
                    log::error!("[{}] Deployment failed: {}", id, cause);
                    self.abandon(&mut run.in_flight);
                    return Err(SchedulerError::DeployFailure {
                        id,
                        cause,
                        started: run.deployed,
                    });
                }
                Err(e) => {
                    // Tasks are only aborted after the run has already ended
                    log::warn!("Deploy task ended unexpectedly: {}", e);
                }
            }
        }
    }

    /// Spawn the deploy of one unit into the in-flight set
    fn dispatch(
        &self,
        in_flight: &mut JoinSet<DeployOutcome>,
        id: String,
        unit: UnitSpec,
        global: &ConfigMap,
    ) {
        log::info!("Deploying: '{}'", id);

        let request = DeployRequest {
            unit_id: id.clone(),
            type_name: unit.name,
            config: merge(global, &unit.config),
            options: unit.options,
        };
        let adapter = Arc::clone(&self.adapter);
        let timeout = self.config.deploy_timeout;

        in_flight.spawn(async move {
            let deploy = AssertUnwindSafe(deploy_with_timeout(adapter, request, timeout));
            let outcome = match deploy.catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err("deploy panicked".to_string()),
            };
            (id, outcome)
        });
    }

    /// Stop waiting for deploys still in flight after a failure
    fn abandon(&self, in_flight: &mut JoinSet<DeployOutcome>) {
        if in_flight.is_empty() {
            return;
        }
        if self.config.cancel_on_failure {
            log::warn!("Cancelling {} in-flight deploy(s)", in_flight.len());
            in_flight.abort_all();
        } else {
            log::warn!(
                "{} in-flight deploy(s) left running, their results will be discarded",
                in_flight.len()
            );
            in_flight.detach_all();
        }
    }
}

async fn deploy_with_timeout(
    adapter: Arc<dyn DeployAdapter>,
    request: DeployRequest,
    timeout: Option<Duration>,
) -> Result<InstanceId, String> {
    let deploy = adapter.deploy(request);
    let result: Result<InstanceId, DeployError> = match timeout {
        Some(limit) => match tokio::time::timeout(limit, deploy).await {
            Ok(result) => result,
            Err(_) => return Err(format!("timed out after {}ms", limit.as_millis())),
        },
        None => deploy.await,
    };
    result.map_err(|e| e.to_string())
}

/// Errors that end a scheduling run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("'{id}' -> {cause}")]
    DeployFailure {
        id: String,
        cause: String,
        /// Units started before the failure (not rolled back)
        started: Vec<String>,
    },

    #[error("Dependencies can never be satisfied for: {}", .stuck.join(", "))]
    DependencyUnsatisfiable {
        stuck: Vec<String>,
        /// Units started before the run stalled
        started: Vec<String>,
    },
}

impl SchedulerError {
    /// Units that were started before the run ended
    pub fn started(&self) -> &[String] {
        match self {
            SchedulerError::DeployFailure { started, .. }
            | SchedulerError::DependencyUnsatisfiable { started, .. } => started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records requests; fails types listed in `failing`
    #[derive(Default)]
    struct RecordingAdapter {
        failing: Vec<&'static str>,
        requests: Mutex<Vec<DeployRequest>>,
    }

    #[async_trait]
    impl DeployAdapter for RecordingAdapter {
        async fn deploy(&self, request: DeployRequest) -> Result<InstanceId, DeployError> {
            let type_name = request.type_name.clone();
            self.requests.lock().unwrap().push(request);
            tokio::task::yield_now().await;
            if self.failing.contains(&type_name.as_str()) {
                return Err(DeployError::UnknownType(type_name));
            }
            Ok(InstanceId::generate())
        }
    }

    fn units(specs: &[(&str, UnitSpec)]) -> IndexMap<String, UnitSpec> {
        specs
            .iter()
            .map(|(id, spec)| (id.to_string(), spec.clone()))
            .collect()
    }

    fn scheduler(adapter: Arc<RecordingAdapter>) -> WaveScheduler {
        WaveScheduler::new(adapter)
    }

    #[test]
    fn test_evaluate_selects_units_without_dependencies() {
        let mut run = WaveRun::new(units(&[
            ("a", UnitSpec::new("x")),
            ("b", UnitSpec::new("x").depends_on("a")),
            ("c", UnitSpec::new("x")),
        ]));

        match run.evaluate() {
            Evaluation::Dispatch(wave) => {
                let ids: Vec<_> = wave.iter().map(|(id, _)| id.as_str()).collect();
                assert_eq!(ids, vec!["a", "c"]);
            }
            other => panic!("unexpected evaluation: {:?}", other),
        }
        assert_eq!(run.pending.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_evaluate_after_deploy_releases_dependents() {
        let mut run = WaveRun::new(units(&[("b", UnitSpec::new("x").depends_on("a"))]));
        run.record_deployed("a".to_string());

        assert!(matches!(run.evaluate(), Evaluation::Dispatch(wave) if wave.len() == 1));
        assert_eq!(run.evaluate(), Evaluation::Succeeded);
    }

    #[test]
    fn test_evaluate_reports_stalled_units_sorted() {
        let mut run = WaveRun::new(units(&[
            ("b", UnitSpec::new("x").depends_on("a")),
            ("a", UnitSpec::new("x").depends_on("b")),
        ]));
        assert_eq!(
            run.evaluate(),
            Evaluation::Stalled(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[tokio::test]
    async fn test_empty_unit_set_succeeds() {
        let adapter = Arc::new(RecordingAdapter::default());
        let order = scheduler(adapter)
            .run(IndexMap::new(), ConfigMap::new())
            .await
            .unwrap();
        assert!(order.is_empty());
    }

    #[tokio::test]
    async fn test_chain_is_deployed_in_dependency_order() {
        let adapter = Arc::new(RecordingAdapter::default());
        let order = scheduler(adapter)
            .run(
                units(&[
                    ("v1", UnitSpec::new("t")),
                    ("v2", UnitSpec::new("t").depends_on("v3")),
                    ("v3", UnitSpec::new("t").depends_on("v1")),
                ]),
                ConfigMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(order, vec!["v1", "v3", "v2"]);
    }

    #[tokio::test]
    async fn test_merged_config_reaches_adapter() {
        let adapter = Arc::new(RecordingAdapter::default());
        let mut global = ConfigMap::new();
        global.insert("field2".to_string(), json!(300));
        global.insert("field3".to_string(), json!("global"));

        scheduler(Arc::clone(&adapter))
            .run(
                units(&[(
                    "v1",
                    UnitSpec::new("t")
                        .with_config("field3", "text")
                        .with_option("instances", 2),
                )]),
                global,
            )
            .await
            .unwrap();

        let requests = adapter.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].unit_id, "v1");
        assert_eq!(requests[0].config["field3"], json!("text"));
        assert_eq!(requests[0].config["field2"], json!(300));
        assert_eq!(requests[0].options["instances"], json!(2));
    }

    #[tokio::test]
    async fn test_failure_reports_unit_and_cause() {
        let adapter = Arc::new(RecordingAdapter {
            failing: vec!["missing"],
            ..Default::default()
        });
        let err = scheduler(adapter)
            .run(
                units(&[
                    ("ok", UnitSpec::new("t")),
                    ("bad", UnitSpec::new("missing").depends_on("ok")),
                ]),
                ConfigMap::new(),
            )
            .await
            .unwrap_err();

        match &err {
            SchedulerError::DeployFailure { id, cause, started } => {
                assert_eq!(id, "bad");
                assert!(cause.contains("missing"));
                assert_eq!(started, &vec!["ok".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().starts_with("'bad' -> "));
    }

    #[tokio::test]
    async fn test_unknown_dependency_is_unsatisfiable() {
        let adapter = Arc::new(RecordingAdapter::default());
        let err = scheduler(adapter)
            .run(
                units(&[
                    ("a", UnitSpec::new("t")),
                    ("b", UnitSpec::new("t").depends_on("ghost")),
                ]),
                ConfigMap::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SchedulerError::DependencyUnsatisfiable {
                stuck: vec!["b".to_string()],
                started: vec!["a".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_ignore_policy_leaves_cycle_undeployed() {
        let adapter = Arc::new(RecordingAdapter::default());
        let config = SchedulerConfig {
            unsatisfied: UnsatisfiedPolicy::Ignore,
            ..Default::default()
        };
        let order = scheduler(Arc::clone(&adapter))
            .with_config(config)
            .run(
                units(&[
                    ("a", UnitSpec::new("t").depends_on("b")),
                    ("b", UnitSpec::new("t").depends_on("a")),
                ]),
                ConfigMap::new(),
            )
            .await
            .unwrap();

        assert!(order.is_empty());
        assert!(adapter.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.unsatisfied, UnsatisfiedPolicy::Fail);
        assert!(!config.cancel_on_failure);
        assert!(config.deploy_timeout.is_none());
    }
}
