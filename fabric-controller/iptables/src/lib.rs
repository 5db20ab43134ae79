//! Fabric controller rule engine
//!
//! Maintains the packet-filter state that routes traffic between this cluster
//! and its remote clusters:
//!
//! ```text
//! POSTROUTING -> FABRIC-POSTROUTING -> FABRIC-PSTRT-CLS-<cluster>
//! PREROUTING  -> FABRIC-PREROUTING  -> FABRIC-PRRT-CLS-<cluster>
//! FORWARD     -> FABRIC-FORWARD     -> FABRIC-FRWD-CLS-<cluster>
//! INPUT       -> FABRIC-INPUT       -> FABRIC-INPT-CLS-<cluster>
//! ```
//!
//! The global containers are hooked into the standard chains once, by
//! [`Handler::init`]. Each remote cluster owns one container per category and
//! one hook rule in each global container that diverts the cluster's traffic
//! into it. Updates are applied as the minimal set of rule insertions and
//! removals, so repeating an operation with the same configuration leaves the
//! host untouched.
//!
//! All host access goes through the [`Backend`] trait.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
mod handler;
pub mod memory;
pub mod reconcile;
mod system;
mod topology;


pub use self::{
    backend::{Backend, BackendError, RuleContainer},
    handler::Handler,
    memory::MemoryBackend,
    system::IptablesBackend,
};
pub use fabric_controller_core::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid network configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0} does not exist; the handler is not initialized")]
    Uninitialized(RuleContainer),
}
