//! TOLLGATE Helper Daemon - Messages
//! File Path: services/helperd/src/messages.rs
//! Responsibility: Request and response types exchanged with clients

use serde::{Deserialize, Serialize};

/// A listening address handed to the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }

    /// Address other processes should connect to. A wildcard bind becomes loopback.
    pub fn connectable_addr(&self) -> &str {
        if self.addr == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.addr
        }
    }
}

/// Client requests. `None` clears the setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    SetSocks5Proxy(Option<Endpoint>),
    SetHttpProxy(Option<Endpoint>),
    SetDns(Option<Endpoint>),
    CurrentVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Done,
    Version(String),
    /// The operation ran and failed
    Failed(String),
    /// Generic refusal. Carries no detail about which criterion failed.
    Rejected,
}
