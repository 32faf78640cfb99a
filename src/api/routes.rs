use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::hypervisor::{HypervisorClient, HypervisorError, VmSpec, VmStatus, VmSummary};

/// Shared application state for the VM routes
#[derive(Clone)]
pub struct AppState {
    pub hypervisor: Arc<dyn HypervisorClient>,
}

/// Create the VM API router (mounted behind the auth guard)
pub fn vm_router(state: AppState) -> Router {
    Router::new()
        .route("/api/create-vm", post(create_vm))
        .route("/api/vm-status/:vmid", get(vm_status))
        .route("/api/delete-vm/:vmid", delete(delete_vm))
        .route("/api/vm-list", get(vm_list))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: format!("vmforge-backend {} is running", env!("CARGO_PKG_VERSION")),
    })
}

/// Contact form stub: logged only, nothing is delivered
pub async fn contact(Json(payload): Json<ContactRequest>) -> Json<serde_json::Value> {
    info!(
        name = %payload.name,
        email = %payload.email,
        message_len = payload.message.len(),
        "📨 Contact form submission"
    );

    Json(json!({ "success": true }))
}

/// Create and start a VM
async fn create_vm(
    State(state): State<AppState>,
    Json(req): Json<CreateVmRequest>,
) -> Result<Json<CreateVmResponse>, ApiError> {
    log_payment("creation", &req.payment_info);

    state.hypervisor.create_vm(&req.spec).await?;
    state.hypervisor.start_vm(req.spec.vmid).await?;
    let vm_status = state.hypervisor.vm_status(req.spec.vmid).await?;

    info!("🖥️  VM {} ({}) created and started", req.spec.vmid, req.spec.name);

    Ok(Json(CreateVmResponse {
        status: "success".to_string(),
        message: format!("VM {} created and started successfully", req.spec.name),
        vm_status,
        payment_processed: true,
        payment_details: req.payment_info,
    }))
}

/// Pass-through status lookup
async fn vm_status(
    State(state): State<AppState>,
    Path(vmid): Path<u32>,
) -> Result<Json<VmStatus>, ApiError> {
    Ok(Json(state.hypervisor.vm_status(vmid).await?))
}

/// Stop (best effort) and delete a VM
async fn delete_vm(
    State(state): State<AppState>,
    Path(vmid): Path<u32>,
    Json(payment): Json<PaymentInfo>,
) -> Result<Json<serde_json::Value>, ApiError> {
    log_payment("deletion", &payment);

    // VM might already be stopped; deletion proceeds either way
    if let Err(e) = state.hypervisor.stop_vm(vmid).await {
        debug!("Pre-delete stop for VM {} skipped: {}", vmid, e);
    }

    state.hypervisor.delete_vm(vmid).await?;

    info!("🗑️  VM {} deleted", vmid);

    Ok(Json(json!({
        "status": "success",
        "message": format!("VM with ID {} deleted successfully", vmid),
        "payment_processed": true,
        "payment_details": payment,
    })))
}

/// Pass-through listing
async fn vm_list(State(state): State<AppState>) -> Result<Json<VmListResponse>, ApiError> {
    let vms = state.hypervisor.list_vms().await?;
    Ok(Json(VmListResponse {
        count: vms.len(),
        vms,
    }))
}

fn log_payment(action: &str, payment: &PaymentInfo) {
    info!(
        upi_id = %payment.upi_id,
        amount = payment.amount,
        currency = %payment.currency,
        method = %payment.payment_method,
        "💳 Recording UPI payment for VM {}",
        action
    );
}

// ===== Request/Response Types =====

/// UPI payment details attached to billable VM actions.
/// Logged only; never verified or settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub upi_id: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_payment_method() -> String {
    "UPI".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateVmRequest {
    #[serde(flatten)]
    pub spec: VmSpec,
    pub payment_info: PaymentInfo,
}

#[derive(Debug, Serialize)]
pub struct CreateVmResponse {
    pub status: String,
    pub message: String,
    pub vm_status: VmStatus,
    pub payment_processed: bool,
    pub payment_details: PaymentInfo,
}

#[derive(Debug, Serialize)]
pub struct VmListResponse {
    pub count: usize,
    pub vms: Vec<VmSummary>,
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    VmNotFound(u32),
    Upstream(String),
}

impl From<HypervisorError> for ApiError {
    fn from(err: HypervisorError) -> Self {
        match err {
            HypervisorError::NotFound(vmid) => ApiError::VmNotFound(vmid),
            HypervisorError::Api(msg) => ApiError::Upstream(msg),
            HypervisorError::Transport(msg) => ApiError::Upstream(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::VmNotFound(vmid) => (
                StatusCode::NOT_FOUND,
                format!("VM with ID {} not found", vmid),
            ),
            ApiError::Upstream(msg) => {
                tracing::error!("Hypervisor error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Hypervisor request failed".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
