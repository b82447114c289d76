//! Test helpers for scheduler integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use deployer::{DeployAdapter, DeployError, DeployRequest, InstanceId, UnitSpec};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

/// How the scripted adapter reacts to a type name
#[derive(Clone)]
pub enum Behaviour {
    /// Succeed after a delay
    Succeed(Duration),
    /// Fail after a delay
    Fail(Duration),
    /// Panic inside the deploy call
    Panic,
    /// Never complete
    Hang,
    /// Succeed once every unit sharing the barrier has started
    Rendezvous(Arc<Barrier>),
}

/// Something the adapter observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

/// Adapter whose behaviour is scripted per type name.
///
/// Unscripted type names fail with [`DeployError::UnknownType`].
#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    behaviours: HashMap<String, Behaviour>,
    events: Arc<Mutex<Vec<Event>>>,
    requests: Arc<Mutex<Vec<DeployRequest>>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, type_name: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(type_name.to_string(), behaviour);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Unit ids in the order their deploy was requested
    pub fn requested_ids(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.unit_id).collect()
    }

    pub fn finished(&self, id: &str) -> bool {
        self.events().contains(&Event::Finished(id.to_string()))
    }

    /// Position of an event, if it happened
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DeployAdapter for ScriptedAdapter {
    async fn deploy(&self, request: DeployRequest) -> Result<InstanceId, DeployError> {
        let id = request.unit_id.clone();
        let behaviour = self.behaviours.get(&request.type_name).cloned();
        self.requests.lock().unwrap().push(request.clone());
        self.record(Event::Started(id.clone()));

        let result = match behaviour {
            None => Err(DeployError::UnknownType(request.type_name)),
            Some(Behaviour::Succeed(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(InstanceId(format!("{}-instance", id)))
            }
            Some(Behaviour::Fail(delay)) => {
                tokio::time::sleep(delay).await;
                Err(DeployError::StartFailed(format!("{} refused to start", id)))
            }
            Some(Behaviour::Panic) => panic!("{} blew up", id),
            Some(Behaviour::Hang) => std::future::pending().await,
            Some(Behaviour::Rendezvous(barrier)) => {
                barrier.wait().await;
                Ok(InstanceId(format!("{}-instance", id)))
            }
        };

        self.record(Event::Finished(id));
        result
    }
}

/// Build a unit map from `(id, type name, dependencies)` triples
pub fn units(entries: &[(&str, &str, &[&str])]) -> IndexMap<String, UnitSpec> {
    entries
        .iter()
        .map(|(id, type_name, deps)| {
            let spec = deps
                .iter()
                .fold(UnitSpec::new(*type_name), |spec, dep| spec.depends_on(*dep));
            (id.to_string(), spec)
        })
        .collect()
}

/// Path of a file under `tests/fixtures`
pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

pub const SHORT: Duration = Duration::from_millis(10);
pub const LONG: Duration = Duration::from_millis(150);
