//! Custom Resource Definitions for Lattice
//!
//! This module contains the CRD definitions consumed by the registry add-on.

mod cluster;
mod types;

pub use cluster::{ClusterRef, LatticeCluster, LatticeClusterSpec};
pub use types::{EndpointsSpec, RegistrySpec};
