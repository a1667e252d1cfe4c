use crate::config::NavConfig;
use crate::geo::{bearing_deg, compass_direction, format_distance, haversine_m};
use crate::models::{Coordinate, Destination, Instruction, ManeuverKind, RouteResult};

/// Straight-line estimate used when the routing service has nothing for us.
///
/// Always a single instruction: compass direction toward the destination, the
/// haversine distance, and `fallback_seconds_per_km` as the assumed pace.
pub fn fallback_route(
    origin: Coordinate,
    destination: &Destination,
    config: &NavConfig,
) -> RouteResult {
    let target = destination.coordinate();
    let distance = haversine_m(origin, target);
    let duration = estimated_duration_seconds(distance, config);
    let direction = compass_direction(bearing_deg(origin, target));

    let text = if destination.name.trim().is_empty() {
        format!("Head {direction} for {} to reach your destination", format_distance(distance))
    } else {
        format!(
            "Head {direction} for {} to reach {}",
            format_distance(distance),
            destination.name.trim()
        )
    };

    RouteResult {
        instructions: vec![Instruction {
            text,
            distance_meters: distance,
            duration_seconds: duration,
            maneuver_point: None,
            kind: ManeuverKind::Depart,
        }],
        total_distance_meters: distance,
        total_duration_seconds: duration,
        geometry: vec![origin, target],
    }
}

pub fn estimated_duration_seconds(distance_m: f64, config: &NavConfig) -> f64 {
    distance_m / 1000.0 * config.fallback_seconds_per_km
}
