//! Fabric controller index
//!
//! Watches `TunnelEndpoint` resources and drives the rule engine:
//!
//! ```text
//! [ TunnelEndpoint ] -> [ Index ] -- Update --> [ Controller ] -> [ Handler ]
//! ```
//!
//! The index keeps the last network configuration of every endpoint and
//! publishes the narrowest engine operation for each change. The controller
//! applies updates sequentially on a blocking thread and retries failed ones
//! after a fixed backoff, unless a later update for the same cluster has
//! already been received.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod index;
mod metrics;

#[cfg(test)]
mod tests;

pub use self::{
    controller::Controller,
    index::{Index, Op, SharedIndex, Update},
    metrics::ControllerMetrics,
};
