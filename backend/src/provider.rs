//! Route acquisition from an OSRM-compatible routing service.
//!
//! The session only depends on [`RouteProvider`]; network failures, non-2xx
//! replies and empty route sets all come back as [`RouteProviderError`] and the
//! session degrades them to an estimated route.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::geo::{compass_direction, format_distance};
use crate::models::{Coordinate, Instruction, ManeuverKind, RouteResult};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteProviderError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("routing service returned HTTP {0}")]
    Http(u16),
    #[error("routing service returned {code}: {message}")]
    Service { code: String, message: String },
    #[error("no route found")]
    NoRoute,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RouteProviderError {
    /// Transient failures worth another attempt.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http(status) => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RouteProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Source of point-to-point routes.
///
/// Implementations must not distinguish "no route" from "network error" in a
/// way the caller relies on: both lead to the same estimated-route fallback.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn request_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, RouteProviderError>;
}

pub struct OsrmRouteProvider {
    http: Client,
    config: ProviderConfig,
}

impl OsrmRouteProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, RouteProviderError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("namma-nav/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    fn route_url(&self, origin: Coordinate, destination: Coordinate) -> String {
        route_url(&self.config, origin, destination)
    }

    async fn fetch(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, RouteProviderError> {
        let res = self
            .http
            .get(self.route_url(origin, destination))
            .query(&[
                ("overview", "full"),
                ("geometries", "geojson"),
                ("steps", "true"),
            ])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(RouteProviderError::Http(status.as_u16()));
        }

        let body: OsrmResponse = res.json().await?;
        normalize(body)
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteProvider {
    async fn request_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<RouteResult, RouteProviderError> {
        let route = (|| async { self.fetch(origin, destination).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(250))
                    .with_max_delay(Duration::from_secs(2))
                    .with_max_times(self.config.max_retries),
            )
            .when(|e: &RouteProviderError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "route request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

        debug!(
            "route from {:?} to {:?}: {} instructions, {:.0} m",
            origin,
            destination,
            route.instructions.len(),
            route.total_distance_meters
        );
        Ok(route)
    }
}

pub fn route_url(config: &ProviderConfig, origin: Coordinate, destination: Coordinate) -> String {
    format!(
        "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}",
        config.base_url.trim_end_matches('/'),
        config.profile,
        origin.lng,
        origin.lat,
        destination.lng,
        destination.lat
    )
}

#[derive(Debug, Deserialize)]
pub struct OsrmResponse {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmRoute {
    pub distance: f64,
    pub duration: f64,
    pub geometry: OsrmGeometry,
    #[serde(default)]
    pub legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmGeometry {
    /// GeoJSON order: `[lng, lat]`.
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmLeg {
    #[serde(default)]
    pub steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmStep {
    pub distance: f64,
    pub duration: f64,
    #[serde(default)]
    pub name: String,
    pub maneuver: OsrmManeuver,
}

#[derive(Debug, Deserialize)]
pub struct OsrmManeuver {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub modifier: Option<String>,
    #[serde(default)]
    pub bearing_after: Option<f64>,
    pub location: [f64; 2],
}

/// Turn an OSRM reply into a [`RouteResult`], keeping only the first route.
pub fn normalize(response: OsrmResponse) -> Result<RouteResult, RouteProviderError> {
    if response.code != "Ok" {
        return Err(RouteProviderError::Service {
            message: response.message.unwrap_or_default(),
            code: response.code,
        });
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or(RouteProviderError::NoRoute)?;

    let instructions: Vec<Instruction> = route
        .legs
        .iter()
        .flat_map(|leg| leg.steps.iter())
        .map(step_to_instruction)
        .collect();

    if instructions.is_empty() {
        return Err(RouteProviderError::NoRoute);
    }

    let geometry = route
        .geometry
        .coordinates
        .iter()
        .map(|[lng, lat]| Coordinate::new(*lat, *lng))
        .collect();

    Ok(RouteResult {
        instructions,
        total_distance_meters: route.distance,
        total_duration_seconds: route.duration,
        geometry,
    })
}

fn step_to_instruction(step: &OsrmStep) -> Instruction {
    let [lng, lat] = step.maneuver.location;
    let kind = match step.maneuver.kind.as_str() {
        "depart" => ManeuverKind::Depart,
        "arrive" => ManeuverKind::Arrive,
        _ => ManeuverKind::Continue,
    };

    Instruction {
        text: instruction_text(step),
        distance_meters: step.distance,
        duration_seconds: step.duration,
        maneuver_point: Some(Coordinate::new(lat, lng)),
        kind,
    }
}

fn instruction_text(step: &OsrmStep) -> String {
    let name = step.name.trim();
    let modifier = step.maneuver.modifier.as_deref().unwrap_or("straight");
    let onto = |base: String| {
        if name.is_empty() {
            base
        } else {
            format!("{base} onto {name}")
        }
    };

    match step.maneuver.kind.as_str() {
        "depart" => {
            let direction = step
                .maneuver
                .bearing_after
                .map(compass_direction)
                .unwrap_or("out");
            let base = format!("Head {direction}");
            let base = if name.is_empty() {
                base
            } else {
                format!("{base} on {name}")
            };
            if step.distance > 0.0 {
                format!("{base} for {}", format_distance(step.distance))
            } else {
                base
            }
        }
        "arrive" => match modifier {
            "left" | "right" => format!("Arrive at your destination on the {modifier}"),
            _ => "Arrive at your destination".to_string(),
        },
        "roundabout" | "rotary" => onto("At the roundabout, take the exit".to_string()),
        "continue" | "new name" => onto("Continue".to_string()),
        "merge" => onto(format!("Merge {modifier}")),
        "fork" => onto(format!("Keep {modifier} at the fork")),
        _ => match modifier {
            "straight" => onto("Continue straight".to_string()),
            "uturn" => onto("Make a U-turn".to_string()),
            other => onto(format!("Turn {other}")),
        },
    }
}
