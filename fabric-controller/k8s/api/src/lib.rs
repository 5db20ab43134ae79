#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod tunnel_endpoint;

pub use self::tunnel_endpoint::{TunnelEndpoint, TunnelEndpointSpec, TunnelEndpointStatus};
pub use k8s_openapi::api;
pub use kube::{
    api::{Api, ObjectMeta, Resource, ResourceExt},
    runtime::watcher,
    Client, CustomResourceExt,
};
