use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components finite and inside the lat/lng ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }
}

/// A navigation target picked from the map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Id of the location record owned by the map layer.
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Destination {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManeuverKind {
    Depart,
    Continue,
    Arrive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub text: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maneuver_point: Option<Coordinate>,
    pub kind: ManeuverKind,
}

/// Normalized route, independent of the routing service that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub instructions: Vec<Instruction>,
    pub total_distance_meters: f64,
    pub total_duration_seconds: f64,
    pub geometry: Vec<Coordinate>,
}

impl RouteResult {
    pub fn last_index(&self) -> usize {
        self.instructions.len().saturating_sub(1)
    }
}

/// One reading from the geolocation source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    /// Accuracy radius in meters.
    #[serde(default)]
    pub accuracy: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationPhase {
    Idle,
    Routing,
    Active,
    Arrived,
    Cancelled,
    Expired,
}

impl NavigationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Arrived | Self::Cancelled | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Origin,
    Destination,
    User,
}

/// Instruction for the map renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CameraCommand {
    FlyTo {
        center: Coordinate,
        zoom: f64,
        duration_seconds: f64,
    },
    SetView {
        center: Coordinate,
        zoom: f64,
    },
    DrawRoute {
        geometry: Vec<Coordinate>,
    },
    ClearRoute,
    PlaceMarker {
        marker: MarkerKind,
        at: Coordinate,
    },
    RemoveMarker {
        marker: MarkerKind,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartNavigationRequest {
    pub destination: Destination,
    #[serde(default = "default_follow_camera")]
    pub follow_camera: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowCameraRequest {
    pub follow: bool,
}

/// Snapshot of the session as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationView {
    pub phase: NavigationPhase,
    pub destination: Option<Destination>,
    pub route: Option<RouteResult>,
    pub current_instruction_index: usize,
    pub current_instruction: Option<Instruction>,
    pub distance_to_destination_meters: Option<f64>,
    pub user_location: Option<Coordinate>,
    pub map_bearing: f64,
    pub follow_camera: bool,
    pub used_fallback_route: bool,
    pub used_fallback_advance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// How the previous session ended, once it has been reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<NavigationPhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpxResponse {
    pub gpx_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

pub fn default_follow_camera() -> bool {
    true
}
