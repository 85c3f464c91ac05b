//! # eksform - Declarative EKS Stack Composition
//!
//! eksform composes an EKS stack out of pinned, versioned units (naming
//! context, VPC, subnet groups, cluster, IRSA role, managed node group and
//! add-ons), validates the composition before anything is touched, diffs it
//! against recorded state and drives a provider through plan, apply and
//! destroy.
//!
//! ## Core Concepts
//!
//! - **Units**: declared configuration blocks, each backed by a [`sources::ModulePin`]
//! - **References**: unit attributes that read another unit's outputs; every
//!   reference is an edge in the dependency graph
//! - **Plan**: per-unit create / update / replace / delete decisions against state
//! - **Provider**: the capability that actually creates and deletes resources
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │            (plan / apply / destroy / validate / graph)               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Planner  (stack -> units)                        │
//! │      naming, CIDR allocation, sizing and access entry checks         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │ Dependency Graph│   │   Plan / Diff       │   │   State Manager     │
//! │  (petgraph)     │   │  (fingerprints)     │   │  (JSON / memory)    │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Engine  (waves on tokio)                         │
//! │          timeouts, retries, halting dependents on failure            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Provider                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eksform::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let stack = StackConfig::load("stack.yml")?;
//!     let blueprint = Planner::build(&stack)?;
//!
//!     let state = Arc::new(StateManager::open(PersistenceBackend::Json("eksform.state.json".into()))?);
//!     let plan = Plan::compute(&blueprint, &state.snapshot())?;
//!     println!("{}", plan.summary());
//!
//!     let provider = Arc::new(SimulatedProvider::new(blueprint.context.provider.clone()));
//!     let report = Engine::new(provider, state).apply(&plan).await?;
//!     assert!(report.succeeded());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::cluster::{
        reconcile, AccessChangeSet, AccessEntry, AccessEntryMap, AccessScope, AddonDescriptor,
        ClusterDescriptor, IamRoleDescriptor,
    };
    pub use crate::config::Config;
    pub use crate::context::{NamingContext, ProviderContext, StackContext};
    pub use crate::engine::{
        ApplyReport, Engine, EngineConfig, Provider, ProviderError, SimulatedProvider, UnitStatus,
    };
    pub use crate::error::{Error, Result};
    pub use crate::graph::{
        resolve_attributes, AttrValue, Declare, DependencyGraph, OutputRef, Outputs, Unit,
        UnitKind, UnitSet,
    };
    pub use crate::network::{Ipv4Cidr, NetworkBoundary, SubnetAllocator, SubnetGroup, SubnetType};
    pub use crate::nodegroup::{NodeGroupDescriptor, ScalingConfig};
    pub use crate::plan::{Action, Plan, PlanSummary, PlannedChange};
    pub use crate::planner::{Blueprint, Planner};
    pub use crate::retry::RetryPolicy;
    pub use crate::sources::{ModuleCatalog, ModulePin};
    pub use crate::stack::StackConfig;
    pub use crate::state::{PersistenceBackend, StateManager, StateRecord, UnitRecord};
    pub use crate::tags::Tags;
}

// ============================================================================
// Core
// ============================================================================

/// Error types
pub mod error;

/// Ordered tag maps with right-biased merge
pub mod tags;

/// Naming convention and caller identity
pub mod context;

/// Pinned external module sources
pub mod sources;

// ============================================================================
// Units
// ============================================================================

/// Unit declarations, dependency graph and output resolution
pub mod graph;

/// VPC and subnet groups
pub mod network;

/// Control plane, access entries, IAM role and add-ons
pub mod cluster;

/// Managed node group
pub mod nodegroup;

// ============================================================================
// Planning and execution
// ============================================================================

/// Stack variables file
pub mod stack;

/// Stack variables to unit declarations
pub mod planner;

/// Plans against recorded state
pub mod plan;

/// Recorded state and persistence
pub mod state;

/// Reconciliation engine and providers
pub mod engine;

/// Retry policy for provider calls
pub mod retry;

// ============================================================================
// Tool configuration
// ============================================================================

/// Layered tool configuration
pub mod config;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
