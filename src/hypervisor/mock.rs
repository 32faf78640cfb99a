//! In-memory hypervisor stand-in.
//!
//! Used when no Proxmox host is configured, and by tests.

use crate::hypervisor::{
    HvResult, HypervisorClient, HypervisorError, VmSpec, VmStatus, VmSummary,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Default)]
pub struct MockHypervisor {
    vms: RwLock<HashMap<u32, MockVm>>,
}

struct MockVm {
    spec: VmSpec,
    started_at: Option<Instant>,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.read().len()
    }
}

#[async_trait]
impl HypervisorClient for MockHypervisor {
    async fn create_vm(&self, spec: &VmSpec) -> HvResult<()> {
        let mut vms = self.vms.write();
        if vms.contains_key(&spec.vmid) {
            return Err(HypervisorError::Api(format!(
                "VM {} already exists",
                spec.vmid
            )));
        }

        vms.insert(
            spec.vmid,
            MockVm {
                spec: spec.clone(),
                started_at: None,
            },
        );
        Ok(())
    }

    async fn start_vm(&self, vmid: u32) -> HvResult<()> {
        let mut vms = self.vms.write();
        let vm = vms.get_mut(&vmid).ok_or(HypervisorError::NotFound(vmid))?;
        if vm.started_at.is_none() {
            vm.started_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn stop_vm(&self, vmid: u32) -> HvResult<()> {
        let mut vms = self.vms.write();
        let vm = vms.get_mut(&vmid).ok_or(HypervisorError::NotFound(vmid))?;
        vm.started_at = None;
        Ok(())
    }

    async fn delete_vm(&self, vmid: u32) -> HvResult<()> {
        let mut vms = self.vms.write();
        vms.remove(&vmid)
            .map(|_| ())
            .ok_or(HypervisorError::NotFound(vmid))
    }

    async fn vm_status(&self, vmid: u32) -> HvResult<VmStatus> {
        let vms = self.vms.read();
        let vm = vms.get(&vmid).ok_or(HypervisorError::NotFound(vmid))?;

        Ok(VmStatus {
            vmid,
            name: vm.spec.name.clone(),
            status: if vm.started_at.is_some() {
                "running"
            } else {
                "stopped"
            }
            .to_string(),
            uptime: vm
                .started_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            cpus: vm.spec.cores as f64,
            maxmem: vm.spec.memory * 1024 * 1024,
        })
    }

    async fn list_vms(&self) -> HvResult<Vec<VmSummary>> {
        let vms = self.vms.read();
        let mut out: Vec<VmSummary> = vms
            .values()
            .map(|vm| VmSummary {
                vmid: vm.spec.vmid,
                name: vm.spec.name.clone(),
                status: if vm.started_at.is_some() {
                    "running"
                } else {
                    "stopped"
                }
                .to_string(),
            })
            .collect();
        out.sort_by_key(|vm| vm.vmid);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(vmid: u32) -> VmSpec {
        VmSpec {
            name: format!("vm-{}", vmid),
            vmid,
            memory: 2048,
            cores: 2,
            storage: "local-lvm".to_string(),
            iso: "debian-12.iso".to_string(),
            network: "vmbr0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let hv = MockHypervisor::new();

        hv.create_vm(&spec(100)).await.unwrap();
        let status = hv.vm_status(100).await.unwrap();
        assert_eq!(status.status, "stopped");

        hv.start_vm(100).await.unwrap();
        let status = hv.vm_status(100).await.unwrap();
        assert_eq!(status.status, "running");
        assert_eq!(status.cpus, 2.0);
        assert_eq!(status.maxmem, 2048 * 1024 * 1024);

        hv.stop_vm(100).await.unwrap();
        hv.delete_vm(100).await.unwrap();
        assert_eq!(hv.vm_count(), 0);

        assert!(matches!(
            hv.vm_status(100).await,
            Err(HypervisorError::NotFound(100))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_vmid_rejected() {
        let hv = MockHypervisor::new();
        hv.create_vm(&spec(100)).await.unwrap();

        assert!(matches!(
            hv.create_vm(&spec(100)).await,
            Err(HypervisorError::Api(_))
        ));
        assert_eq!(hv.vm_count(), 1);
    }

    #[tokio::test]
    async fn test_listing_is_ordered_by_vmid() {
        let hv = MockHypervisor::new();
        hv.create_vm(&spec(104)).await.unwrap();
        hv.create_vm(&spec(101)).await.unwrap();
        hv.create_vm(&spec(102)).await.unwrap();

        let vms = hv.list_vms().await.unwrap();
        let ids: Vec<u32> = vms.iter().map(|vm| vm.vmid).collect();
        assert_eq!(ids, vec![101, 102, 104]);
    }

    #[tokio::test]
    async fn test_unknown_vm_operations_fail() {
        let hv = MockHypervisor::new();

        assert!(matches!(
            hv.start_vm(999).await,
            Err(HypervisorError::NotFound(999))
        ));
        assert!(matches!(
            hv.stop_vm(999).await,
            Err(HypervisorError::NotFound(999))
        ));
        assert!(matches!(
            hv.delete_vm(999).await,
            Err(HypervisorError::NotFound(999))
        ));
    }
}
