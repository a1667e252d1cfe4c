pub mod config;
pub mod driver;
pub mod error;
pub mod geo;
pub mod geolocation;
pub mod gpx_export;
pub mod map;
pub mod models;
pub mod provider;
pub mod routing;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::driver::NavigationHandle;
use crate::error::NavError;
use crate::gpx_export::{encode_route_as_gpx, GpxExportError};
use crate::map::CommandQueue;
use crate::models::{
    ApiError, CameraCommand, FollowCameraRequest, GpxResponse, NavigationView, PositionFix,
    StartNavigationRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub navigation: NavigationHandle,
    pub map: Arc<CommandQueue>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/navigation",
            get(navigation_handler)
                .post(start_handler)
                .delete(cancel_handler),
        )
        .route("/api/navigation/follow", put(follow_handler))
        .route("/api/navigation/route.gpx", get(gpx_handler))
        .route("/api/position", post(position_handler))
        .route("/api/map/commands", get(map_commands_handler))
        .with_state(state)
}

/// GET /api/navigation - Current session
async fn navigation_handler(State(state): State<AppState>) -> Json<NavigationView> {
    Json(state.navigation.view())
}

/// POST /api/navigation - Start guidance to a destination
async fn start_handler(
    State(state): State<AppState>,
    Json(req): Json<StartNavigationRequest>,
) -> ApiResult<Json<NavigationView>> {
    tracing::info!("navigation requested to {} ({})", req.destination.name, req.destination.id);
    state
        .navigation
        .start(req.destination, req.follow_camera)
        .await
        .map(Json)
        .map_err(nav_error_to_api_error)
}

/// DELETE /api/navigation - Cancel guidance, no-op when idle
async fn cancel_handler(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state
        .navigation
        .cancel()
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(nav_error_to_api_error)
}

/// PUT /api/navigation/follow - Toggle camera follow
async fn follow_handler(
    State(state): State<AppState>,
    Json(req): Json<FollowCameraRequest>,
) -> ApiResult<Json<NavigationView>> {
    state
        .navigation
        .set_follow_camera(req.follow)
        .await
        .map(Json)
        .map_err(nav_error_to_api_error)
}

/// GET /api/navigation/route.gpx - Active route as base64 GPX
async fn gpx_handler(State(state): State<AppState>) -> ApiResult<Json<GpxResponse>> {
    let session = state.navigation.state();
    let Some(route) = session.route.as_ref() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                message: "no active route".to_string(),
            }),
        ));
    };

    encode_route_as_gpx(route, session.destination.as_ref())
        .map(|gpx_base64| Json(GpxResponse { gpx_base64 }))
        .map_err(gpx_error)
}

/// POST /api/position - Publish a position fix to the shared feed
async fn position_handler(
    State(state): State<AppState>,
    Json(fix): Json<PositionFix>,
) -> ApiResult<StatusCode> {
    state
        .navigation
        .publish_position(fix)
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(nav_error_to_api_error)
}

/// GET /api/map/commands - Drain pending camera commands
async fn map_commands_handler(State(state): State<AppState>) -> Json<Vec<CameraCommand>> {
    Json(state.map.drain())
}

fn nav_error_to_api_error(err: NavError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        NavError::NoPosition => StatusCode::UNPROCESSABLE_ENTITY,
        NavError::InvalidCoordinate { .. } => StatusCode::BAD_REQUEST,
        NavError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}

fn gpx_error(err: GpxExportError) -> (StatusCode, Json<ApiError>) {
    let status = match err {
        GpxExportError::EmptyRoute => StatusCode::NOT_FOUND,
        GpxExportError::Gpx(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            message: err.to_string(),
        }),
    )
}
