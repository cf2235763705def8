use actix_web::{http::StatusCode, test, web, App};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

use lenscap::api::feed::LiveFeed;
use lenscap::api::routes;
use lenscap::api::state::AppState;
use lenscap::capture::controller::CaptureController;
use lenscap::capture::delivery::{PacketStore, RecordConsumer};
use lenscap::capture::local::LocalAddresses;
use lenscap::capture::pipeline::FramePipeline;
use lenscap::capture::queue::IngestQueue;
use lenscap::capture::source::{CaptureHandle, CaptureOpener};
use lenscap::models::config::CaptureOptions;
use lenscap::models::record::{PacketRecord, ProtocolDetails, TcpDetails, TcpFlag, TcpFlags};
use lenscap::models::stats::CaptureStats;
use lenscap::storage::sink::NullSink;
use lenscap::utils::error::CaptureError;

struct RefusingOpener;

impl CaptureOpener for RefusingOpener {
    fn open(&self, interface: &str, _options: &CaptureOptions) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        Err(CaptureError::OpenFailure {
            interface: interface.to_string(),
            reason: "permission denied".to_string(),
        })
    }
}

fn tcp_record(source: &str, dport: u16) -> Arc<PacketRecord> {
    Arc::new(PacketRecord {
        timestamp: Utc::now(),
        source: source.to_string(),
        destination: "10.0.0.2".to_string(),
        protocol: "TCP".to_string(),
        length: 54,
        summary: format!("TCP 40000 → {}", dport),
        dump: String::new(),
        is_self_originated: false,
        is_broadcast_or_multicast: false,
        details: Some(ProtocolDetails::Tcp(TcpDetails {
            source_port: 40000,
            destination_port: dport,
            window: 1024,
            flags: TcpFlags::from_flags(&[TcpFlag::Ack]),
            payload: None,
        })),
    })
}

fn state() -> web::Data<AppState> {
    let pipeline = Arc::new(FramePipeline::new(
        Arc::new(LocalAddresses::default()),
        Arc::new(NullSink),
        Arc::new(CaptureStats::new()),
    ));
    let controller = CaptureController::new(
        Arc::new(RefusingOpener),
        CaptureOptions::default(),
        pipeline,
        Arc::new(IngestQueue::unbounded()),
    );

    let store = Arc::new(RwLock::new(PacketStore::new()));
    let mut feed = LiveFeed::new(store.clone());
    feed.deliver(&[tcp_record("10.0.0.1", 443), tcp_record("172.16.0.5", 1337)]);

    web::Data::new(AppState {
        controller: Arc::new(controller),
        store,
        batches: feed.sender(),
        interface: Some("eth9".to_string()),
    })
}

#[actix_rt::test]
async fn status_reports_idle_session() {
    let app = test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/api/capture/status").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["state"], "idle");
    assert_eq!(body["session"], Value::Null);
    assert_eq!(body["delivered"], 2);

    let req = test::TestRequest::post().uri("/api/capture/stop").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["outcome"], "already_idle");
}

#[actix_rt::test]
async fn failed_start_is_a_bad_request() {
    let app = test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

    let req = test::TestRequest::post().uri("/api/capture/start").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn packet_listing_follows_live_filter() {
    let app = test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/api/packets").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["packets"][1]["summary"], "TCP 40000 → 1337");

    let req = test::TestRequest::put()
        .uri("/api/filter")
        .set_json(json!({"query": "172.16"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["visible"], 1);
    assert_eq!(body["total"], 2);

    let req = test::TestRequest::get().uri("/api/packets").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["delivered"], 2);
    assert_eq!(body["packets"][0]["index"], 1);
    assert_eq!(body["filter"], "172.16");

    let req = test::TestRequest::delete().uri("/api/filter").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["visible"], 2);
}

#[actix_rt::test]
async fn packet_detail_carries_anomaly_verdict() {
    let app = test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/api/packets/1").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["suspicious"], true);
    assert_eq!(body["anomaly"]["reason"], "odd_tcp_port");
    assert_eq!(body["traffic_class"], "foreign");
    assert_eq!(body["packet"]["details"]["flags"], json!(["ACK"]));

    let req = test::TestRequest::get().uri("/api/packets/0").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["suspicious"], false);
    assert_eq!(body["anomaly"], Value::Null);

    let req = test::TestRequest::get().uri("/api/packets/9").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn clearing_packets_empties_stats() {
    let app = test::init_service(App::new().app_data(state()).configure(routes::configure)).await;

    let req = test::TestRequest::get().uri("/api/packets/stats").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["protocols"]["TCP"], 2);

    let req = test::TestRequest::delete().uri("/api/packets").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["cleared"], 2);

    let req = test::TestRequest::get().uri("/api/packets/stats").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["total"], 0);
}
