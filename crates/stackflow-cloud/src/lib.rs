//! Stackflow Cloud Provisioning
//!
//! This crate turns a declarative set of resource descriptors into a
//! dependency-ordered, resumable sequence of create / wait / link operations
//! against an injected control-plane gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  Stackflow CLI                   │
//! │            (stackflow validate / up)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ Descriptors  │─▶│ Dependency graph builder │ │
//! │  └──────────────┘  └────────────┬─────────────┘ │
//! │  ┌──────────────┐  ┌────────────▼─────────────┐ │
//! │  │  Run ledger  │◀─│   Provisioning engine    │ │
//! │  └──────────────┘  └────────────┬─────────────┘ │
//! └─────────────────────────────────┼───────────────┘
//!                                   │
//!                 ┌─────────────────▼───────────────┐
//!                 │ trait ProviderGateway           │
//!                 │ trait NotificationSink          │
//!                 └─────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{EngineConfig, LedgerStore, ProvisioningEngine, StackFile};
//! use std::sync::Arc;
//!
//! let stack = StackFile::load("stack.yaml")?;
//! let graph = stack.graph()?;
//! let engine = ProvisioningEngine::new(Arc::new(my_gateway), stack.settings.clone())
//!     .with_store(LedgerStore::for_project("."));
//! let report = engine.resume(&graph).await?;
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod ledger;
pub mod notify;
pub mod report;
pub mod stack;
pub mod wait;

// Re-exports
pub use config::{EngineConfig, KindConfig, MAX_CONCURRENCY, RetryConfig, RollbackPolicy, WaitConfig};
pub use descriptor::{DescriptorSet, ReferenceField, ResourceDescriptor, ResourceKind};
pub use engine::ProvisioningEngine;
pub use error::{CloudError, Result};
pub use gateway::{NotificationSink, ProviderGateway, ProvisionRequest, Readiness};
pub use graph::DependencyGraph;
pub use ledger::{
    LedgerLock, LedgerSnapshot, LedgerStore, ResourceState, ResourceStatus, RunLedger, Transition,
};
pub use notify::{LifecycleEvent, NotificationBinder, PublishSummary, SinkRoutedGateway};
pub use report::{ReportSummary, ResourceReport, RunReport, RunStatus};
pub use stack::{StackFile, WebAppParams, web_app, web_app_stack};
pub use tokio_util::sync::CancellationToken;
