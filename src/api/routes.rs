use actix_web::{web, HttpResponse, Responder};
use serde_json::json;
use crate::api::handlers::{
    capture::{
        list_interfaces,
        start_capture,
        stop_capture,
        toggle_capture,
        get_capture_status,
    },
    filters::{
        get_filter,
        set_filter,
        clear_filter,
    },
    packets::{
        get_packets,
        get_packet,
        clear_packets,
        get_packet_stats,
    },
};
use crate::api::websocket::ws_index;

/// Root endpoint to provide information about the API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "lenscap API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Live packet capture with ownership tagging and anomaly flagging",
        "endpoints": [
            {
                "path": "/api/interfaces",
                "method": "GET",
                "description": "List available network interfaces"
            },
            {
                "path": "/api/capture/start",
                "method": "POST",
                "description": "Start packet capture"
            },
            {
                "path": "/api/capture/stop",
                "method": "POST",
                "description": "Stop packet capture"
            },
            {
                "path": "/api/capture/toggle",
                "method": "POST",
                "description": "Start or stop capture depending on the current state"
            },
            {
                "path": "/api/capture/status",
                "method": "GET",
                "description": "Get status of the capture"
            },
            {
                "path": "/api/packets",
                "method": "GET",
                "description": "Get a page of packets matching the live filter"
            },
            {
                "path": "/api/packets",
                "method": "DELETE",
                "description": "Clear delivered packets"
            },
            {
                "path": "/api/packets/{index}",
                "method": "GET",
                "description": "Get details and anomaly verdict of a specific packet"
            },
            {
                "path": "/api/packets/stats",
                "method": "GET",
                "description": "Get packet counts per protocol"
            },
            {
                "path": "/api/filter",
                "method": "GET, PUT, DELETE",
                "description": "Read, apply or clear the live filter"
            },
            {
                "path": "/api/ws",
                "method": "GET",
                "description": "WebSocket endpoint for live packets and session events"
            }
        ]
    }))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint
        .route("/", web::get().to(index))
        .service(
            web::scope("/api")
                // WebSocket route for real-time updates
                .route("/ws", web::get().to(ws_index))

                // Capture management
                .service(
                    web::scope("/interfaces")
                        .route("", web::get().to(list_interfaces))
                )
                .service(
                    web::scope("/capture")
                        .route("/start", web::post().to(start_capture))
                        .route("/stop", web::post().to(stop_capture))
                        .route("/toggle", web::post().to(toggle_capture))
                        .route("/status", web::get().to(get_capture_status))
                )
                // Packet data
                .service(
                    web::scope("/packets")
                        .route("", web::get().to(get_packets))
                        .route("", web::delete().to(clear_packets))
                        .route("/stats", web::get().to(get_packet_stats))
                        .route("/{index}", web::get().to(get_packet))
                )
                // Live filter
                .service(
                    web::scope("/filter")
                        .route("", web::get().to(get_filter))
                        .route("", web::put().to(set_filter))
                        .route("", web::delete().to(clear_filter))
                )
        );
}
