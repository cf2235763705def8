use actix_web::{web, HttpResponse, Responder};
use log::info;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;

/// Set filter request
#[derive(Deserialize)]
pub struct SetFilterRequest {
    query: String,
}

#[derive(Serialize)]
struct FilterResponse {
    filter: Option<String>,
    visible: usize,
    total: usize,
}

fn current(state: &AppState) -> FilterResponse {
    let store = state.store.read();
    FilterResponse {
        filter: store.filter().map(|f| f.query().to_string()),
        visible: store.visible_len(),
        total: store.len(),
    }
}

/// Get the live filter
pub async fn get_filter(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(current(&state))
}

/// Apply a live filter; blank text clears it
pub async fn set_filter(
    state: web::Data<AppState>,
    req: web::Json<SetFilterRequest>,
) -> impl Responder {
    state.store.write().set_filter(&req.query);
    let response = current(&state);
    info!("Filter {:?} matches {} of {} packets", response.filter, response.visible, response.total);
    HttpResponse::Ok().json(response)
}

/// Clear the live filter
pub async fn clear_filter(state: web::Data<AppState>) -> impl Responder {
    state.store.write().clear_filter();
    HttpResponse::Ok().json(current(&state))
}
