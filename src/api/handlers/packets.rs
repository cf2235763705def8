use actix_web::{web, HttpResponse, Responder};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::feed::PacketRow;
use crate::api::state::AppState;
use crate::capture::inspector::{inspect, AnomalyReason};
use crate::models::record::{PacketRecord, TrafficClass};
use crate::models::stats::StatsSnapshot;

/// Query parameters for listing packets
#[derive(Deserialize)]
pub struct PacketsQuery {
    /// Offset for pagination
    #[serde(default = "default_offset")]
    offset: usize,

    /// Limit for pagination
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_offset() -> usize { 0 }
fn default_limit() -> usize { 100 }

/// Response for listing packets
#[derive(Serialize)]
struct PacketsResponse {
    packets: Vec<PacketRow>,
    /// Records matching the live filter
    total: usize,
    /// Records delivered so far
    delivered: usize,
    offset: usize,
    limit: usize,
    filter: Option<String>,
}

/// Full record plus the verdicts shown in the detail pane
#[derive(Serialize)]
struct PacketDetail {
    index: usize,
    time: String,
    traffic_class: TrafficClass,
    suspicious: bool,
    anomaly: Option<AnomalyReason>,
    anomaly_description: Option<String>,
    packet: Arc<PacketRecord>,
}

#[derive(Serialize)]
struct PacketStatsResponse {
    total: usize,
    protocols: BTreeMap<String, usize>,
    capture: StatsSnapshot,
}

/// Get a page of the filtered packet list
pub async fn get_packets(
    state: web::Data<AppState>,
    query: web::Query<PacketsQuery>,
) -> impl Responder {
    let store = state.store.read();
    let packets: Vec<PacketRow> = store
        .visible_page(query.offset, query.limit)
        .iter()
        .map(|(index, record)| PacketRow::new(*index, record))
        .collect();

    let response = PacketsResponse {
        packets,
        total: store.visible_len(),
        delivered: store.len(),
        offset: query.offset,
        limit: query.limit,
        filter: store.filter().map(|f| f.query().to_string()),
    };
    drop(store);

    HttpResponse::Ok().json(response)
}

/// Get details of a specific packet
pub async fn get_packet(
    state: web::Data<AppState>,
    path: web::Path<usize>,
) -> impl Responder {
    let index = path.into_inner();
    let record = state.store.read().get(index).cloned();

    match record {
        Some(record) => {
            let anomaly = inspect(&record);
            HttpResponse::Ok().json(PacketDetail {
                index,
                time: record.time_label(),
                traffic_class: record.traffic_class(),
                suspicious: anomaly.is_some(),
                anomaly_description: anomaly.as_ref().map(|a| a.to_string()),
                anomaly,
                packet: record,
            })
        }
        None => HttpResponse::NotFound().json(serde_json::json!({
            "status": "error",
            "message": format!("Packet with index {} not found", index)
        })),
    }
}

/// Forget every delivered packet
pub async fn clear_packets(state: web::Data<AppState>) -> impl Responder {
    let mut store = state.store.write();
    let cleared = store.len();
    store.clear();
    drop(store);

    info!("Cleared {} packets", cleared);
    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "cleared": cleared
    }))
}

/// Get packet statistics
pub async fn get_packet_stats(state: web::Data<AppState>) -> impl Responder {
    let (total, protocols) = {
        let store = state.store.read();
        (store.len(), store.protocol_counts())
    };

    HttpResponse::Ok().json(PacketStatsResponse {
        total,
        protocols,
        capture: state.controller.stats().snapshot(chrono::Utc::now()),
    })
}
