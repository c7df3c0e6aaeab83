//! TOLLGATE Helper Daemon
//! File Path: services/helperd/src/lib.rs
//! Responsibility: Privileged helper that changes network settings for authorized peers
//! Depends on: services/policy (every request passes its gate)

pub mod config;
pub mod ipc;
pub mod messages;
pub mod ops;
pub mod server;

pub use config::{HelperConfig, HelperSettings};
pub use messages::{Endpoint, Request, Response};
pub use ops::{FileNetworkSettings, NetworkSettings, HELPER_VERSION};
pub use server::Server;
