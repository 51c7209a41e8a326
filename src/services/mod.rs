//! Orchestration services: each wraps one or more infrastructure clients to
//! implement a component from spec §4 (D–I) in terms of the typed clients
//! and domain model beneath it.

pub mod build_monitor;
pub mod classifier;
pub mod dispatch_publisher;
pub mod promotion;
pub mod repository_orchestrator;
pub mod state_store;

pub use build_monitor::{BuildMonitor, MonitorConfig, Outcome, ProgressEvent};
pub use dispatch_publisher::DispatchPublisher;
pub use promotion::{EnvStatus, EnvStatusKind, PromotionService};
pub use repository_orchestrator::{BootstrapMode, DeploySecrets, RepositoryOrchestrator, TemplateContext};
pub use state_store::{DeploymentHandle, DeploymentStore};
