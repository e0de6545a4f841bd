//! Fan-out of one task across a cluster of device endpoints.

use std::collections::HashMap;

use crate::actions::{ConfirmationCallback, TakeoverCallback};
use crate::coordination::{CoordinationConfig, PilotAgent, PilotConfig};
use crate::model::ModelConfig;

/// One device endpoint an agent can be built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// ADB device id; None targets the default device.
    pub device_id: Option<String>,
}

impl DeviceEndpoint {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
        }
    }

    fn key(&self) -> String {
        self.device_id.clone().unwrap_or_else(|| "default".to_string())
    }
}

/// Runs the same task on every endpoint, one independent agent per device.
///
/// Endpoints share nothing mutable: each agent owns its device handle,
/// observer and RNG, so one endpoint's failure never aborts its siblings.
pub struct ClusterRunner {
    endpoints: Vec<DeviceEndpoint>,
    model_config: ModelConfig,
    pilot_config: PilotConfig,
    coordination: CoordinationConfig,
    parallel: bool,
    confirmation_callback: Option<ConfirmationCallback>,
    takeover_callback: Option<TakeoverCallback>,
}

impl ClusterRunner {
    pub fn new(
        endpoints: Vec<DeviceEndpoint>,
        model_config: ModelConfig,
        pilot_config: PilotConfig,
        coordination: CoordinationConfig,
    ) -> Self {
        Self {
            endpoints,
            model_config,
            pilot_config,
            coordination,
            parallel: true,
            confirmation_callback: None,
            takeover_callback: None,
        }
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_callbacks(
        mut self,
        confirmation: Option<ConfirmationCallback>,
        takeover: Option<TakeoverCallback>,
    ) -> Self {
        self.confirmation_callback = confirmation;
        self.takeover_callback = takeover;
        self
    }

    /// Run the task on all endpoints and collect per-endpoint results.
    pub async fn run(&self, task: &str) -> HashMap<String, String> {
        if self.parallel && self.endpoints.len() > 1 {
            self.run_parallel(task).await
        } else {
            self.run_sequential(task).await
        }
    }

    async fn run_parallel(&self, task: &str) -> HashMap<String, String> {
        let mut handles = Vec::new();
        for endpoint in &self.endpoints {
            let key = endpoint.key();
            let endpoint = endpoint.clone();
            let task = task.to_string();
            let model_config = self.model_config.clone();
            let pilot_config = self.endpoint_config(&endpoint);
            let coordination = self.coordination.clone();
            let confirmation = self.confirmation_callback.clone();
            let takeover = self.takeover_callback.clone();

            handles.push((
                key,
                tokio::spawn(async move {
                    run_on_endpoint(
                        task,
                        model_config,
                        pilot_config,
                        coordination,
                        confirmation,
                        takeover,
                    )
                    .await
                }),
            ));
        }

        let mut results = HashMap::new();
        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(message) => message,
                Err(e) => format!("error: {}", e),
            };
            results.insert(key, outcome);
        }
        results
    }

    async fn run_sequential(&self, task: &str) -> HashMap<String, String> {
        let mut results = HashMap::new();
        for endpoint in &self.endpoints {
            let outcome = run_on_endpoint(
                task.to_string(),
                self.model_config.clone(),
                self.endpoint_config(endpoint),
                self.coordination.clone(),
                self.confirmation_callback.clone(),
                self.takeover_callback.clone(),
            )
            .await;
            results.insert(endpoint.key(), outcome);
        }
        results
    }

    fn endpoint_config(&self, endpoint: &DeviceEndpoint) -> PilotConfig {
        let mut config = self.pilot_config.clone();
        config.device_id = endpoint.device_id.clone();
        config
    }
}

async fn run_on_endpoint(
    task: String,
    model_config: ModelConfig,
    pilot_config: PilotConfig,
    coordination: CoordinationConfig,
    confirmation: Option<ConfirmationCallback>,
    takeover: Option<TakeoverCallback>,
) -> String {
    let device_label = pilot_config
        .device_id
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let mut agent = match PilotAgent::new(
        model_config,
        pilot_config,
        coordination,
        confirmation,
        takeover,
    ) {
        Ok(agent) => agent,
        Err(e) => return format!("error: {}", e),
    };
    tracing::info!("running task on device '{}'", device_label);
    agent.run(&task).await
}
