//! Cluster-plane records and the task executors that operate on them.
//!
//! This crate owns everything the scheduler dispatches into: organization
//! and cluster records, snapshots, diagnostics dumps, opaque keys, the
//! per-cluster periodic job configuration, and the meta/HTTP connections
//! used to reach a live cluster.

pub mod db;
pub mod diag;
pub mod error;
pub mod handler;
pub mod keys;
pub mod meta;
pub mod service;
pub mod store;
pub mod types;

pub use diag::{DiagnosticsFetcher, HttpDiagnosticsClient};
pub use error::{ClusterError, Result};
pub use handler::ClusterTaskHandler;
pub use keys::KeyStore;
pub use meta::{CommandMetaManager, MetaClient, MetaClientManager};
pub use service::ClusterConfigService;
pub use store::OrgTimezoneResolver;
pub use types::{
    AutoBackupConfig, AutoDiagnosticConfig, Cluster, ClusterParams, Diagnostic, Organization,
    Snapshot,
};
