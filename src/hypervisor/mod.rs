//! Hypervisor management clients.
//!
//! VM lifecycle calls are pass-throughs to an external hypervisor. Route
//! handlers only see the `HypervisorClient` trait; behind it sit a real
//! Proxmox VE client and an in-memory mock, selected at startup and injected
//! through router state.

pub mod mock;
pub mod proxmox;

pub use mock::MockHypervisor;
pub use proxmox::{ProxmoxClient, ProxmoxConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// VM creation parameters forwarded to the hypervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub vmid: u32,
    /// Memory in MiB
    pub memory: u64,
    pub cores: u16,
    pub storage: String,
    pub iso: String,
    /// Bridge the first NIC attaches to
    pub network: String,
}

/// Current state of a VM as reported by the hypervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmStatus {
    pub vmid: u32,
    pub name: String,
    pub status: String,
    pub uptime: u64,
    pub cpus: f64,
    pub maxmem: u64,
}

/// One row of the VM listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSummary {
    pub vmid: u32,
    pub name: String,
    pub status: String,
}

/// Hypervisor failure modes
#[derive(Debug)]
pub enum HypervisorError {
    /// The hypervisor has no VM with the requested id
    NotFound(u32),
    /// The hypervisor rejected the request
    Api(String),
    /// The hypervisor could not be reached
    Transport(String),
}

impl fmt::Display for HypervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HypervisorError::NotFound(vmid) => write!(f, "VM with ID {} not found", vmid),
            HypervisorError::Api(msg) => write!(f, "Hypervisor API error: {}", msg),
            HypervisorError::Transport(msg) => write!(f, "Hypervisor unreachable: {}", msg),
        }
    }
}

impl std::error::Error for HypervisorError {}

impl From<reqwest::Error> for HypervisorError {
    fn from(e: reqwest::Error) -> Self {
        HypervisorError::Transport(e.to_string())
    }
}

pub type HvResult<T> = Result<T, HypervisorError>;

/// Hypervisor management operations used by the VM routes
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    async fn create_vm(&self, spec: &VmSpec) -> HvResult<()>;
    async fn start_vm(&self, vmid: u32) -> HvResult<()>;
    async fn stop_vm(&self, vmid: u32) -> HvResult<()>;
    async fn delete_vm(&self, vmid: u32) -> HvResult<()>;
    async fn vm_status(&self, vmid: u32) -> HvResult<VmStatus>;
    async fn list_vms(&self) -> HvResult<Vec<VmSummary>>;
}
