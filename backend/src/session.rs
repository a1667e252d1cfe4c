//! Navigation session state machine.
//!
//! `Idle -> Routing -> Active -> {Arrived, Cancelled, Expired} -> Idle`
//!
//! [`reduce`] is pure: it takes the current state and one event and returns the
//! next state together with the [`Effect`]s the caller has to carry out
//! (persistence, route requests, timer control, camera moves). The driver is the
//! only owner of the mutable state and the only executor of effects.

use chrono::{DateTime, Utc};

use crate::config::NavConfig;
use crate::error::NavError;
use crate::geo::{bearing_deg, haversine_m};
use crate::models::{
    CameraCommand, Coordinate, Destination, Instruction, MarkerKind, NavigationPhase,
    NavigationView, RouteResult,
};
use crate::provider::RouteProviderError;
use crate::routing::fallback_route;
use crate::store::PersistedNavigation;

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationState {
    pub phase: NavigationPhase,
    /// Bumped on every start/restore so late route responses can be dropped.
    pub session_id: u64,
    /// Position when routing was requested.
    pub origin: Option<Coordinate>,
    pub destination: Option<Destination>,
    pub route: Option<RouteResult>,
    pub current_instruction_index: usize,
    /// Progress carried over from a persisted session, applied once the new
    /// route arrives.
    pub pending_instruction_index: Option<usize>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub follow_camera: bool,
    pub user_location: Option<Coordinate>,
    pub map_bearing: f64,
    pub used_fallback_route: bool,
    /// Set when the last advance came from the timer rather than proximity.
    pub used_fallback_advance: bool,
    pub advanced_since_tick: bool,
    pub last_outcome: Option<NavigationPhase>,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            phase: NavigationPhase::Idle,
            session_id: 0,
            origin: None,
            destination: None,
            route: None,
            current_instruction_index: 0,
            pending_instruction_index: None,
            created_at: None,
            expires_at: None,
            follow_camera: true,
            user_location: None,
            map_bearing: 0.0,
            used_fallback_route: false,
            used_fallback_advance: false,
            advanced_since_tick: false,
            last_outcome: None,
        }
    }
}

impl NavigationState {
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            NavigationPhase::Routing | NavigationPhase::Active
        )
    }

    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.route
            .as_ref()
            .and_then(|route| route.instructions.get(self.current_instruction_index))
    }

    pub fn distance_to_destination(&self) -> Option<f64> {
        let user = self.user_location?;
        let destination = self.destination.as_ref()?;
        Some(haversine_m(user, destination.coordinate()))
    }

    pub fn to_record(&self, now: DateTime<Utc>) -> PersistedNavigation {
        PersistedNavigation {
            is_navigating: self.is_active(),
            destination: self.destination.clone(),
            route_info: self.route.clone(),
            current_instruction_index: self.current_instruction_index,
            routing_initiated: self.phase == NavigationPhase::Routing,
            user_location: self.user_location,
            map_bearing: self.map_bearing,
            timestamp: now,
            expires_at: self.expires_at.unwrap_or(now),
        }
    }

    pub fn view(&self) -> NavigationView {
        NavigationView {
            phase: self.phase,
            destination: self.destination.clone(),
            route: self.route.clone(),
            current_instruction_index: self.current_instruction_index,
            current_instruction: self.current_instruction().cloned(),
            distance_to_destination_meters: self.distance_to_destination(),
            user_location: self.user_location,
            map_bearing: self.map_bearing,
            follow_camera: self.follow_camera,
            used_fallback_route: self.used_fallback_route,
            used_fallback_advance: self.used_fallback_advance,
            expires_at: self.expires_at,
            last_outcome: self.last_outcome,
        }
    }

    /// Where guidance currently points: the pending maneuver, else the
    /// destination.
    fn guidance_target(&self) -> Option<Coordinate> {
        let destination = self.destination.as_ref()?.coordinate();
        Some(
            self.current_instruction()
                .and_then(|instruction| instruction.maneuver_point)
                .unwrap_or(destination),
        )
    }

    fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    fn refresh_expiry(&mut self, now: DateTime<Utc>, config: &NavConfig) {
        self.expires_at = Some(now + config.session_timeout());
    }

    fn update_bearing(&mut self) {
        if let (Some(user), Some(target)) = (self.user_location, self.guidance_target()) {
            if haversine_m(user, target) > 1.0 {
                self.map_bearing = bearing_deg(user, target);
            }
        }
    }
}

#[derive(Debug)]
pub enum NavEvent {
    Start {
        destination: Destination,
        position: Option<Coordinate>,
        follow_camera: bool,
        now: DateTime<Utc>,
    },
    RouteResolved {
        session_id: u64,
        outcome: Result<RouteResult, RouteProviderError>,
        now: DateTime<Utc>,
    },
    PositionUpdate {
        position: Coordinate,
        now: DateTime<Utc>,
    },
    Tick {
        now: DateTime<Utc>,
    },
    CheckTimeout {
        now: DateTime<Utc>,
    },
    Cancel {
        now: DateTime<Utc>,
    },
    Reset,
    SetFollowCamera {
        follow: bool,
        now: DateTime<Utc>,
    },
    Restore {
        record: PersistedNavigation,
        now: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Persist(PersistedNavigation),
    ClearPersisted,
    RequestRoute {
        session_id: u64,
        origin: Coordinate,
        destination: Coordinate,
    },
    StartAdvanceTimer,
    StopAdvanceTimer,
    Camera(CameraCommand),
    Notify(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    /// The routing service failed and guidance uses a straight-line estimate.
    UsingEstimatedRoute,
    InstructionAdvanced { index: usize, by_timer: bool },
    Arrived,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: NavigationState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &NavigationState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }
}

/// Apply one event. Only `Start` can fail; every other event degrades to a
/// no-op when it does not apply to the current phase.
pub fn reduce(
    state: &NavigationState,
    event: NavEvent,
    config: &NavConfig,
) -> Result<Transition, NavError> {
    // Nothing may act on a session past its deadline, even before the next
    // timeout check runs.
    let overdue = match &event {
        NavEvent::RouteResolved { now, .. }
        | NavEvent::PositionUpdate { now, .. }
        | NavEvent::Tick { now }
        | NavEvent::SetFollowCamera { now, .. } => state.is_overdue(*now).then_some(*now),
        _ => None,
    };
    if let Some(now) = overdue {
        return Ok(check_timeout(state, now, config));
    }

    let transition = match event {
        NavEvent::Start {
            destination,
            position,
            follow_camera,
            now,
        } => start(state, destination, position, follow_camera, now, config)?,
        NavEvent::RouteResolved {
            session_id,
            outcome,
            now,
        } => route_resolved(state, session_id, outcome, now, config),
        NavEvent::PositionUpdate { position, now } => position_update(state, position, now, config),
        NavEvent::Tick { now } => tick(state, now),
        NavEvent::CheckTimeout { now } => check_timeout(state, now, config),
        NavEvent::Cancel { now } => cancel(state, now, config),
        NavEvent::Reset => reset(state),
        NavEvent::SetFollowCamera { follow, now } => set_follow_camera(state, follow, now, config),
        NavEvent::Restore { record, now } => restore(state, record, now, config),
    };
    Ok(transition)
}

fn start(
    state: &NavigationState,
    destination: Destination,
    position: Option<Coordinate>,
    follow_camera: bool,
    now: DateTime<Utc>,
    config: &NavConfig,
) -> Result<Transition, NavError> {
    let target = crate::geo::validate(destination.coordinate())?;
    let position = crate::geo::validate(position.ok_or(NavError::NoPosition)?)?;

    let mut effects = Vec::new();
    if state.is_active() {
        effects.push(Effect::StopAdvanceTimer);
        effects.push(Effect::Camera(CameraCommand::ClearRoute));
    }

    let next = NavigationState {
        phase: NavigationPhase::Routing,
        session_id: state.session_id + 1,
        origin: Some(position),
        destination: Some(destination),
        route: None,
        current_instruction_index: 0,
        pending_instruction_index: None,
        created_at: Some(now),
        expires_at: Some(now + config.session_timeout()),
        follow_camera,
        user_location: Some(position),
        map_bearing: bearing_deg(position, target),
        used_fallback_route: false,
        used_fallback_advance: false,
        advanced_since_tick: false,
        last_outcome: state.last_outcome,
    };

    effects.push(Effect::Persist(next.to_record(now)));
    effects.push(Effect::RequestRoute {
        session_id: next.session_id,
        origin: position,
        destination: target,
    });
    effects.push(Effect::Camera(CameraCommand::PlaceMarker {
        marker: MarkerKind::Origin,
        at: position,
    }));
    effects.push(Effect::Camera(CameraCommand::PlaceMarker {
        marker: MarkerKind::Destination,
        at: target,
    }));
    effects.push(Effect::Camera(CameraCommand::FlyTo {
        center: target,
        zoom: config.destination_zoom,
        duration_seconds: config.fly_duration_secs,
    }));

    Ok(Transition {
        state: next,
        effects,
    })
}

fn route_resolved(
    state: &NavigationState,
    session_id: u64,
    outcome: Result<RouteResult, RouteProviderError>,
    now: DateTime<Utc>,
    config: &NavConfig,
) -> Transition {
    if state.phase != NavigationPhase::Routing || session_id != state.session_id {
        tracing::debug!(
            "dropping route for session {} (current {}, {:?})",
            session_id,
            state.session_id,
            state.phase
        );
        return Transition::unchanged(state);
    }
    let (Some(origin), Some(destination)) = (state.origin, state.destination.as_ref()) else {
        return Transition::unchanged(state);
    };

    let (route, estimated) = match outcome {
        Ok(route) if !route.instructions.is_empty() => (route, false),
        Ok(_) => {
            tracing::warn!("route provider returned no instructions, using estimate");
            (fallback_route(origin, destination, config), true)
        }
        Err(err) => {
            tracing::warn!("route provider failed, using estimate: {}", err);
            (fallback_route(origin, destination, config), true)
        }
    };

    let mut next = state.clone();
    next.current_instruction_index = next
        .pending_instruction_index
        .take()
        .map(|index| index.min(route.last_index()))
        .unwrap_or(0);
    let geometry = route.geometry.clone();
    next.route = Some(route);
    next.phase = NavigationPhase::Active;
    next.used_fallback_route = estimated;
    next.used_fallback_advance = false;
    next.advanced_since_tick = false;
    next.refresh_expiry(now, config);
    next.update_bearing();

    let mut effects = vec![
        Effect::Camera(CameraCommand::DrawRoute { geometry }),
        Effect::StartAdvanceTimer,
        Effect::Persist(next.to_record(now)),
    ];
    if estimated {
        effects.push(Effect::Notify(Notice::UsingEstimatedRoute));
    }

    // The fix buffered while routing may already be at the destination.
    let remaining = next
        .user_location
        .map(|user| haversine_m(user, destination.coordinate()));
    if let Some(remaining) = remaining.filter(|m| *m < config.arrival_radius_m) {
        tracing::info!(
            "arrived at destination on route arrival (session {}, {:.1} m)",
            next.session_id,
            remaining
        );
        effects.extend(leave_active(&mut next, NavigationPhase::Arrived, config));
        effects.push(Effect::Notify(Notice::Arrived));
    }

    Transition {
        state: next,
        effects,
    }
}

fn position_update(
    state: &NavigationState,
    position: Coordinate,
    now: DateTime<Utc>,
    config: &NavConfig,
) -> Transition {
    if !position.is_valid() {
        tracing::debug!("skipping invalid position {:?}", position);
        return Transition::unchanged(state);
    }

    let mut next = state.clone();
    next.user_location = Some(position);
    let user_marker = Effect::Camera(CameraCommand::PlaceMarker {
        marker: MarkerKind::User,
        at: position,
    });

    match state.phase {
        NavigationPhase::Routing => {
            next.refresh_expiry(now, config);
            let mut effects = vec![user_marker];
            if next.origin.is_none() {
                // Restored session: the first fresh fix becomes the origin.
                next.origin = Some(position);
                if let Some(destination) = next.destination.as_ref() {
                    effects.push(Effect::RequestRoute {
                        session_id: next.session_id,
                        origin: position,
                        destination: destination.coordinate(),
                    });
                }
            }
            next.update_bearing();
            effects.push(Effect::Persist(next.to_record(now)));
            Transition {
                state: next,
                effects,
            }
        }
        NavigationPhase::Active => active_position_update(next, position, now, config, user_marker),
        _ => Transition {
            state: next,
            effects: vec![user_marker],
        },
    }
}

fn active_position_update(
    mut next: NavigationState,
    position: Coordinate,
    now: DateTime<Utc>,
    config: &NavConfig,
    user_marker: Effect,
) -> Transition {
    let Some(destination) = next.destination.as_ref().map(Destination::coordinate) else {
        return Transition {
            state: next,
            effects: vec![user_marker],
        };
    };

    let remaining = haversine_m(position, destination);
    if remaining < config.arrival_radius_m {
        tracing::info!(
            "arrived at destination (session {}, {:.1} m)",
            next.session_id,
            remaining
        );
        let mut effects = vec![user_marker];
        effects.extend(leave_active(&mut next, NavigationPhase::Arrived, config));
        effects.push(Effect::Notify(Notice::Arrived));
        return Transition {
            state: next,
            effects,
        };
    }

    next.refresh_expiry(now, config);
    let mut effects = vec![user_marker];

    let last_index = next.route.as_ref().map(RouteResult::last_index).unwrap_or(0);
    let near_maneuver = next
        .current_instruction()
        .and_then(|instruction| instruction.maneuver_point)
        .map(|point| haversine_m(position, point) < config.maneuver_radius_m)
        .unwrap_or(false);

    if near_maneuver && next.current_instruction_index < last_index {
        next.current_instruction_index += 1;
        next.advanced_since_tick = true;
        next.used_fallback_advance = false;
        tracing::debug!(
            "maneuver reached, instruction {} of {}",
            next.current_instruction_index,
            last_index
        );
        effects.push(Effect::Notify(Notice::InstructionAdvanced {
            index: next.current_instruction_index,
            by_timer: false,
        }));
    }

    next.update_bearing();
    if next.follow_camera {
        effects.push(Effect::Camera(CameraCommand::SetView {
            center: position,
            zoom: config.follow_zoom,
        }));
    }
    effects.push(Effect::Persist(next.to_record(now)));

    Transition {
        state: next,
        effects,
    }
}

fn tick(state: &NavigationState, now: DateTime<Utc>) -> Transition {
    if state.phase != NavigationPhase::Active {
        return Transition::unchanged(state);
    }

    let mut next = state.clone();
    if next.advanced_since_tick {
        next.advanced_since_tick = false;
        return Transition {
            state: next,
            effects: Vec::new(),
        };
    }

    let last_index = next.route.as_ref().map(RouteResult::last_index).unwrap_or(0);
    if next.current_instruction_index >= last_index {
        return Transition::unchanged(state);
    }

    next.current_instruction_index += 1;
    next.used_fallback_advance = true;
    next.update_bearing();
    tracing::debug!(
        "timer advanced to instruction {} of {}",
        next.current_instruction_index,
        last_index
    );

    let effects = vec![
        Effect::Notify(Notice::InstructionAdvanced {
            index: next.current_instruction_index,
            by_timer: true,
        }),
        Effect::Persist(next.to_record(now)),
    ];
    Transition {
        state: next,
        effects,
    }
}

fn check_timeout(state: &NavigationState, now: DateTime<Utc>, config: &NavConfig) -> Transition {
    if !state.is_overdue(now) {
        return Transition::unchanged(state);
    }

    tracing::info!("navigation session {} expired", state.session_id);
    let mut next = state.clone();
    let mut effects = leave_active(&mut next, NavigationPhase::Expired, config);
    effects.push(Effect::Notify(Notice::Expired));
    Transition {
        state: next,
        effects,
    }
}

fn cancel(state: &NavigationState, _now: DateTime<Utc>, config: &NavConfig) -> Transition {
    if !state.is_active() {
        return Transition::unchanged(state);
    }

    tracing::info!("navigation session {} cancelled", state.session_id);
    let mut next = state.clone();
    let mut effects = leave_active(&mut next, NavigationPhase::Cancelled, config);
    effects.push(Effect::Notify(Notice::Cancelled));
    Transition {
        state: next,
        effects,
    }
}

fn reset(state: &NavigationState) -> Transition {
    if state.phase == NavigationPhase::Idle {
        return Transition::unchanged(state);
    }

    let mut effects = Vec::new();
    if state.is_active() {
        effects.push(Effect::StopAdvanceTimer);
        effects.push(Effect::Camera(CameraCommand::ClearRoute));
    }
    effects.push(Effect::ClearPersisted);

    let next = NavigationState {
        session_id: state.session_id,
        follow_camera: state.follow_camera,
        user_location: state.user_location,
        last_outcome: state.phase.is_terminal().then_some(state.phase),
        ..NavigationState::default()
    };
    Transition {
        state: next,
        effects,
    }
}

fn set_follow_camera(
    state: &NavigationState,
    follow: bool,
    now: DateTime<Utc>,
    config: &NavConfig,
) -> Transition {
    let mut next = state.clone();
    next.follow_camera = follow;
    let mut effects = Vec::new();

    if follow {
        if let Some(user) = next.user_location {
            effects.push(Effect::Camera(CameraCommand::SetView {
                center: user,
                zoom: config.follow_zoom,
            }));
        }
    }
    if next.is_active() {
        next.refresh_expiry(now, config);
        effects.push(Effect::Persist(next.to_record(now)));
    }

    Transition {
        state: next,
        effects,
    }
}

fn restore(
    state: &NavigationState,
    record: PersistedNavigation,
    now: DateTime<Utc>,
    config: &NavConfig,
) -> Transition {
    if state.phase != NavigationPhase::Idle {
        return Transition::unchanged(state);
    }

    let destination = match record.destination {
        Some(destination) if record.is_navigating && !record.is_expired(now) => destination,
        _ => {
            return Transition {
                state: state.clone(),
                effects: vec![Effect::ClearPersisted],
            };
        }
    };
    if !destination.coordinate().is_valid() {
        return Transition {
            state: state.clone(),
            effects: vec![Effect::ClearPersisted],
        };
    }

    tracing::info!(
        "restoring navigation to {} at instruction {}",
        destination.name,
        record.current_instruction_index
    );

    let target = destination.coordinate();
    let next = NavigationState {
        phase: NavigationPhase::Routing,
        session_id: state.session_id + 1,
        origin: None,
        destination: Some(destination),
        route: None,
        current_instruction_index: 0,
        pending_instruction_index: Some(record.current_instruction_index),
        created_at: Some(record.timestamp),
        expires_at: Some(now + config.session_timeout()),
        follow_camera: state.follow_camera,
        user_location: None,
        map_bearing: record.map_bearing,
        used_fallback_route: false,
        used_fallback_advance: false,
        advanced_since_tick: false,
        last_outcome: state.last_outcome,
    };

    let effects = vec![
        Effect::Persist(next.to_record(now)),
        Effect::Camera(CameraCommand::PlaceMarker {
            marker: MarkerKind::Destination,
            at: target,
        }),
        Effect::Camera(CameraCommand::FlyTo {
            center: target,
            zoom: config.destination_zoom,
            duration_seconds: config.fly_duration_secs,
        }),
    ];
    Transition {
        state: next,
        effects,
    }
}

/// Shared teardown for arrival, cancel and expiry.
fn leave_active(
    next: &mut NavigationState,
    phase: NavigationPhase,
    config: &NavConfig,
) -> Vec<Effect> {
    next.phase = phase;
    next.expires_at = None;
    next.pending_instruction_index = None;

    let mut effects = vec![
        Effect::StopAdvanceTimer,
        Effect::ClearPersisted,
        Effect::Camera(CameraCommand::ClearRoute),
        Effect::Camera(CameraCommand::RemoveMarker {
            marker: MarkerKind::Destination,
        }),
    ];
    if let Some(user) = next.user_location {
        effects.push(Effect::Camera(CameraCommand::FlyTo {
            center: user,
            zoom: config.follow_zoom,
            duration_seconds: config.fly_duration_secs,
        }));
    }
    effects
}
