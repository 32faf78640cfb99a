//! Proxmox VE REST Client
//!
//! Thin pass-through to `/api2/json` on a single node. The provisioning
//! protocol itself is the hypervisor's concern; this client only forwards
//! lifecycle calls and surfaces failures.

use crate::hypervisor::{
    HvResult, HypervisorClient, HypervisorError, VmSpec, VmStatus, VmSummary,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Connection settings for a Proxmox VE host
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    pub host: String,
    pub node: String,
    pub token_id: String,
    pub token_secret: String,
    pub verify_ssl: bool,
}

#[derive(Clone)]
pub struct ProxmoxClient {
    client: Client,
    base_url: String,
    node: String,
}

/// Proxmox wraps every response payload in a `data` envelope
#[derive(Deserialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Deserialize)]
struct CurrentStatus {
    #[serde(default)]
    name: Option<String>,
    status: String,
    #[serde(default)]
    uptime: u64,
    #[serde(default)]
    cpus: f64,
    #[serde(default)]
    maxmem: u64,
}

#[derive(Deserialize)]
struct QemuListEntry {
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
    status: String,
}

impl ProxmoxClient {
    pub fn new(config: ProxmoxConfig) -> Result<Self> {
        let auth_header = format!("PVEAPIToken={}={}", config.token_id, config.token_secret);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    auth_header.parse().context("Invalid Proxmox API token")?,
                );
                headers
            })
            .build()
            .context("Failed to build Proxmox client")?;

        Ok(Self {
            client,
            base_url: format!("https://{}:8006/api2/json", config.host),
            node: config.node,
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}/nodes/{}{}", self.base_url, self.node, path)
    }

    async fn check(resp: reqwest::Response, vmid: Option<u32>) -> HvResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        if let Some(vmid) = vmid {
            // Proxmox reports unknown vmids as 404 or as 500 "does not exist"
            if status == StatusCode::NOT_FOUND || text.contains("does not exist") {
                return Err(HypervisorError::NotFound(vmid));
            }
        }

        Err(HypervisorError::Api(format!("{}: {}", status, text)))
    }
}

#[async_trait]
impl HypervisorClient for ProxmoxClient {
    async fn create_vm(&self, spec: &VmSpec) -> HvResult<()> {
        let form = [
            ("vmid", spec.vmid.to_string()),
            ("name", spec.name.clone()),
            ("memory", spec.memory.to_string()),
            ("cores", spec.cores.to_string()),
            ("storage", spec.storage.clone()),
            ("iso", spec.iso.clone()),
            ("net0", format!("virtio,bridge={}", spec.network)),
        ];

        let resp = self
            .client
            .post(self.url("/qemu"))
            .form(&form)
            .send()
            .await?;
        Self::check(resp, None).await?;
        Ok(())
    }

    async fn start_vm(&self, vmid: u32) -> HvResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/qemu/{}/status/start", vmid)))
            .send()
            .await?;
        Self::check(resp, Some(vmid)).await?;
        Ok(())
    }

    async fn stop_vm(&self, vmid: u32) -> HvResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/qemu/{}/status/stop", vmid)))
            .send()
            .await?;
        Self::check(resp, Some(vmid)).await?;
        Ok(())
    }

    async fn delete_vm(&self, vmid: u32) -> HvResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/qemu/{}", vmid)))
            .send()
            .await?;
        Self::check(resp, Some(vmid)).await?;
        Ok(())
    }

    async fn vm_status(&self, vmid: u32) -> HvResult<VmStatus> {
        let resp = self
            .client
            .get(self.url(&format!("/qemu/{}/status/current", vmid)))
            .send()
            .await?;
        let resp = Self::check(resp, Some(vmid)).await?;

        let current = resp
            .json::<ApiData<CurrentStatus>>()
            .await
            .map_err(|e| HypervisorError::Api(format!("Bad status payload: {}", e)))?
            .data;

        Ok(VmStatus {
            vmid,
            name: current.name.unwrap_or_default(),
            status: current.status,
            uptime: current.uptime,
            cpus: current.cpus,
            maxmem: current.maxmem,
        })
    }

    async fn list_vms(&self) -> HvResult<Vec<VmSummary>> {
        let resp = self.client.get(self.url("/qemu")).send().await?;
        let resp = Self::check(resp, None).await?;

        let entries = resp
            .json::<ApiData<Vec<QemuListEntry>>>()
            .await
            .map_err(|e| HypervisorError::Api(format!("Bad listing payload: {}", e)))?
            .data;

        let mut vms: Vec<VmSummary> = entries
            .into_iter()
            .map(|entry| VmSummary {
                vmid: entry.vmid,
                name: entry.name.unwrap_or_default(),
                status: entry.status,
            })
            .collect();
        vms.sort_by_key(|vm| vm.vmid);

        Ok(vms)
    }
}
