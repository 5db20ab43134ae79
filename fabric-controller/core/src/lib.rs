//! Fabric controller core
//!
//! Pure building blocks of the rule reconciliation engine: validation of the
//! per-cluster [`NetworkConfig`], naming of the rule containers, and
//! compilation of a configuration into the exact rule strings that must be
//! present in each container. Nothing in this crate touches the host.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod chain;
pub mod cidr;
mod config;
pub mod rules;


pub use self::{
    chain::{short_cluster_id, validate_cluster_id, Category, MAX_CHAIN_NAME_LEN},
    config::{NetworkConfig, Networks, ValidationError, DEFAULT_CIDR_VALUE},
    rules::{ClusterRules, RuleSet},
};
pub use ipnet::IpNet;
