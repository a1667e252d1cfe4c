use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use namma_nav::{
    config::ProviderConfig,
    models::{Coordinate, ManeuverKind},
    provider::{OsrmRouteProvider, RouteProvider, RouteProviderError},
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn coimbatore_route() -> Value {
    json!({
        "code": "Ok",
        "routes": [{
            "distance": 2350.4,
            "duration": 312.7,
            "geometry": {
                "type": "LineString",
                "coordinates": [[76.9558, 11.0168], [76.9601, 11.0190], [76.9716, 11.0274]]
            },
            "legs": [{
                "steps": [
                    {"distance": 480.0, "duration": 60.0, "name": "Avinashi Road",
                     "maneuver": {"type": "depart", "bearing_after": 62.0, "location": [76.9558, 11.0168]}},
                    {"distance": 1870.4, "duration": 252.7, "name": "Race Course Road",
                     "maneuver": {"type": "turn", "modifier": "left", "location": [76.9601, 11.0190]}},
                    {"distance": 0.0, "duration": 0.0, "name": "",
                     "maneuver": {"type": "arrive", "location": [76.9716, 11.0274]}}
                ]
            }]
        }]
    })
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn provider(base_url: String, max_retries: usize) -> OsrmRouteProvider {
    OsrmRouteProvider::new(ProviderConfig {
        base_url,
        profile: "driving".into(),
        request_timeout_ms: 2_000,
        max_retries,
    })
    .unwrap()
}

fn endpoints() -> (Coordinate, Coordinate) {
    (
        Coordinate::new(11.0168, 76.9558),
        Coordinate::new(11.0274, 76.9716),
    )
}

#[tokio::test]
async fn fetches_and_normalizes_route() {
    let base = serve(Router::new().route(
        "/route/v1/driving/*coords",
        get(|| async { Json(coimbatore_route()) }),
    ))
    .await;

    let (origin, destination) = endpoints();
    let route = provider(base, 1)
        .request_route(origin, destination)
        .await
        .unwrap();

    assert_eq!(route.instructions.len(), 3);
    assert_eq!(route.instructions[0].kind, ManeuverKind::Depart);
    assert_eq!(route.instructions[2].kind, ManeuverKind::Arrive);
    assert_eq!(route.geometry.len(), 3);
    assert_eq!(route.total_duration_seconds, 312.7);
}

#[tokio::test]
async fn retries_server_errors_then_gives_up() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(
        Router::new()
            .route(
                "/route/v1/driving/*coords",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::SERVICE_UNAVAILABLE
                }),
            )
            .with_state(hits.clone()),
    )
    .await;

    let (origin, destination) = endpoints();
    let err = provider(base, 1)
        .request_route(origin, destination)
        .await
        .unwrap_err();

    assert_eq!(err, RouteProviderError::Http(503));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(
        Router::new()
            .route(
                "/route/v1/driving/*coords",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_REQUEST
                }),
            )
            .with_state(hits.clone()),
    )
    .await;

    let (origin, destination) = endpoints();
    let err = provider(base, 3)
        .request_route(origin, destination)
        .await
        .unwrap_err();

    assert_eq!(err, RouteProviderError::Http(400));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn service_level_failure_is_reported() {
    let base = serve(Router::new().route(
        "/route/v1/driving/*coords",
        get(|| async {
            Json(json!({ "code": "NoRoute", "message": "Impossible route between points", "routes": [] }))
        }),
    ))
    .await;

    let (origin, destination) = endpoints();
    let err = provider(base, 1)
        .request_route(origin, destination)
        .await
        .unwrap_err();

    assert!(matches!(err, RouteProviderError::Service { ref code, .. } if code == "NoRoute"));
    assert!(!err.should_retry());
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (origin, destination) = endpoints();
    let err = provider(format!("http://{addr}"), 0)
        .request_route(origin, destination)
        .await
        .unwrap_err();

    assert!(matches!(err, RouteProviderError::Transport(_)));
}
