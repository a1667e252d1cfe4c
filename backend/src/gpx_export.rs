use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};

use crate::models::{Coordinate, Destination, RouteResult};

#[derive(Debug, thiserror::Error)]
pub enum GpxExportError {
    #[error("route has no geometry")]
    EmptyRoute,
    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

/// Active route as a base64 GPX 1.1 document: the geometry as a track, and
/// one waypoint per maneuver carrying the instruction text.
pub fn encode_route_as_gpx(
    route: &RouteResult,
    destination: Option<&Destination>,
) -> Result<String, GpxExportError> {
    if route.geometry.is_empty() {
        return Err(GpxExportError::EmptyRoute);
    }

    let title = destination
        .map(|d| format!("Namma City: {}", d.name))
        .unwrap_or_else(|| "Namma City route".to_string());

    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("namma-nav".into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(title),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    for waypoint in route.geometry.iter().map(to_waypoint) {
        segment.points.push(waypoint);
    }
    track.segments.push(segment);
    gpx.tracks.push(track);

    for instruction in &route.instructions {
        if let Some(point) = instruction.maneuver_point {
            let mut waypoint = to_waypoint(&point);
            waypoint.name = Some(instruction.text.clone());
            gpx.waypoints.push(waypoint);
        }
    }

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(BASE64.encode(buffer))
}

fn to_waypoint(coord: &Coordinate) -> Waypoint {
    Waypoint::new(Point::new(coord.lng, coord.lat))
}
