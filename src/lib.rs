// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Phone Pilot
//!
//! Declarative skill engine and dual-tier coordinator for automating mobile
//! phone UI interactions.
//!
//! Tasks are routed to versioned, declarative **skills** (ordered steps with
//! guards, assertions, retries and error handlers) executed against a device
//! reached over ADB. A fast reactive tier executes atomic intents with
//! humanized timing, while a slow planning tier maps tasks to skills and
//! turns runtime failures into recovery skills.
//!
//! ## Example
//!
//! ```rust,no_run
//! use phone_pilot::{CoordinationConfig, ModelConfig, PilotAgent, PilotConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut agent = PilotAgent::new(
//!         ModelConfig::default(),
//!         PilotConfig::default(),
//!         CoordinationConfig::default(),
//!         None,
//!         None,
//!     )?;
//!
//!     let result = agent.run("open the settings page").await;
//!     println!("Task result: {}", result);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod adb;
pub mod cluster;
pub mod config;
pub mod coordination;
pub mod device;
pub mod model;
pub mod skills;

pub use actions::{ActionHandler, ActionResult, ConfirmationCallback, TakeoverCallback};
pub use cluster::{ClusterRunner, DeviceEndpoint};
pub use config::TimingConfig;
pub use coordination::{
    CoordinationConfig, Coordinator, FastActionSystem, Intent, PilotAgent, PilotConfig, Plan,
    PlanStep, PlanStepKind, RecoveryDecision, SlowPlannerSystem, System1Config, System2Config,
};
pub use device::{DeviceCapabilities, DeviceError, Screenshot, NORMALIZED_COORDINATE_MAX};
pub use model::{ModelClient, ModelConfig};
pub use skills::{
    Observation, RouteAction, RoutingDecision, SkillDefinition, SkillDirective, SkillError,
    SkillErrorCode, SkillRegistry, SkillRouter, SkillRouterConfig, SkillRunReport, SkillRunResult,
    SkillRunner, SkillRunnerConfig, Truth,
};
