use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::capture::controller::SessionInfo;
use crate::models::interface::{default_interface, list_interfaces as system_interfaces, InterfaceInfo};
use crate::models::session::SessionState;
use crate::models::stats::StatsSnapshot;
use crate::utils::error::{AppError, CaptureError};

/// Request for starting or toggling capture
#[derive(Deserialize, Default)]
pub struct StartCaptureRequest {
    /// Interface to capture on
    pub interface: Option<String>,
}

/// Response for listing interfaces
#[derive(Serialize)]
struct InterfacesResponse {
    interfaces: Vec<InterfaceInfo>,
    default_interface: Option<String>,
}

/// Response for capture status
#[derive(Serialize)]
struct CaptureStatusResponse {
    state: SessionState,
    session: Option<SessionInfo>,
    stats: StatsSnapshot,
    queued: usize,
    dropped: u64,
    delivered: usize,
}

/// List available network interfaces
pub async fn list_interfaces() -> impl Responder {
    let interfaces = system_interfaces();
    let default = default_interface(&interfaces).map(|info| info.device_name.clone());
    HttpResponse::Ok().json(InterfacesResponse {
        interfaces,
        default_interface: default,
    })
}

fn interface_from(state: &AppState, request: Option<web::Json<StartCaptureRequest>>) -> Result<String, AppError> {
    let requested = request.and_then(|req| req.into_inner().interface);
    state.resolve_interface(requested).ok_or(AppError::NoInterface)
}

fn capture_failure(e: CaptureError) -> HttpResponse {
    match e {
        CaptureError::OpenFailure { .. } => HttpResponse::BadRequest().json(serde_json::json!({
            "status": "error",
            "message": e.to_string()
        })),
        other => HttpResponse::InternalServerError().json(serde_json::json!({
            "status": "error",
            "message": other.to_string()
        })),
    }
}

fn no_interface(e: AppError) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "message": e.to_string()
    }))
}

/// Start packet capture
pub async fn start_capture(
    state: web::Data<AppState>,
    request: Option<web::Json<StartCaptureRequest>>,
) -> impl Responder {
    let interface = match interface_from(&state, request) {
        Ok(interface) => interface,
        Err(e) => return no_interface(e),
    };

    info!("Starting capture with interface: {}", interface);
    let controller = state.controller.clone();

    // Opening the handle and joining an old worker both block
    match web::block(move || controller.start(&interface)).await {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(outcome),
        Ok(Err(e)) => capture_failure(e),
        Err(e) => {
            error!("Capture start task failed: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Stop packet capture
pub async fn stop_capture(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.controller.stop())
}

/// Start when idle, stop when capturing
pub async fn toggle_capture(
    state: web::Data<AppState>,
    request: Option<web::Json<StartCaptureRequest>>,
) -> impl Responder {
    if state.controller.is_capturing() {
        return HttpResponse::Ok().json(state.controller.stop());
    }

    let interface = match interface_from(&state, request) {
        Ok(interface) => interface,
        Err(e) => return no_interface(e),
    };
    let controller = state.controller.clone();

    match web::block(move || controller.toggle(&interface)).await {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(outcome),
        Ok(Err(e)) => capture_failure(e),
        Err(e) => {
            error!("Capture toggle task failed: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Get capture status
pub async fn get_capture_status(state: web::Data<AppState>) -> impl Responder {
    let controller = &state.controller;
    let queue = controller.queue();
    HttpResponse::Ok().json(CaptureStatusResponse {
        state: controller.state(),
        session: controller.current_session(),
        stats: controller.stats().snapshot(chrono::Utc::now()),
        queued: queue.len(),
        dropped: queue.dropped(),
        delivered: state.store.read().len(),
    })
}
