//! Event loop around the session reducer.
//!
//! A single task owns the [`NavigationState`]. Commands from the API, fixes
//! from the position feed, finished route requests and the two timers are
//! serialized through one `select!`, so there is exactly one writer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval, interval_at, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::config::NavConfig;
use crate::error::NavError;
use crate::geolocation::{GeolocationOptions, PositionFeed};
use crate::map::MapRenderer;
use crate::models::{Destination, NavigationPhase, NavigationView, PositionFix, RouteResult};
use crate::provider::{RouteProvider, RouteProviderError};
use crate::session::{reduce, Effect, NavEvent, NavigationState, Transition};
use crate::store::{self, KeyValueStore};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// External collaborators of a session.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn RouteProvider>,
    pub store: Arc<dyn KeyValueStore>,
    pub renderer: Arc<dyn MapRenderer>,
    pub feed: PositionFeed,
    pub clock: Clock,
}

enum Command {
    Start {
        destination: Destination,
        position: Option<PositionFix>,
        follow_camera: bool,
        reply: oneshot::Sender<Result<NavigationView, NavError>>,
    },
    Cancel {
        reply: oneshot::Sender<NavigationView>,
    },
    SetFollowCamera {
        follow: bool,
        reply: oneshot::Sender<NavigationView>,
    },
}

type RouteOutcome = (u64, Result<RouteResult, RouteProviderError>);

enum Wake {
    Command(Option<Command>),
    Position { feed_open: bool },
    Route(RouteOutcome),
    Advance,
    TimeoutCheck,
}

/// Cloneable front end of the driver task.
#[derive(Clone)]
pub struct NavigationHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<NavigationState>,
    feed: PositionFeed,
    geolocation: GeolocationOptions,
    location_cache_ttl: chrono::Duration,
    clock: Clock,
}

impl NavigationHandle {
    /// Start guidance to `destination` from the current fix.
    ///
    /// Fails with [`NavError::NoPosition`] when no usable fix arrives within the
    /// geolocation timeout; the session then stays as it was.
    pub async fn start(
        &self,
        destination: Destination,
        follow_camera: bool,
    ) -> Result<NavigationView, NavError> {
        let position = match self
            .feed
            .current_position(&self.geolocation, (self.clock)())
            .await
        {
            Ok(fix) => Some(fix),
            Err(_) => self.last_known(),
        };
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start {
            destination,
            position,
            follow_camera,
            reply,
        })
        .await?;
        rx.await.map_err(|_| NavError::ServiceUnavailable)?
    }

    pub async fn cancel(&self) -> Result<NavigationView, NavError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| NavError::ServiceUnavailable)
    }

    pub async fn set_follow_camera(&self, follow: bool) -> Result<NavigationView, NavError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetFollowCamera { follow, reply }).await?;
        rx.await.map_err(|_| NavError::ServiceUnavailable)
    }

    /// Latest fix still inside the location cache window.
    fn last_known(&self) -> Option<PositionFix> {
        let now = (self.clock)();
        let fix = self
            .feed
            .latest()
            .filter(|fix| now - fix.timestamp <= self.location_cache_ttl)?;
        info!("no fresh fix, starting from last known position at {}", fix.timestamp);
        Some(fix)
    }

    pub fn publish_position(&self, fix: PositionFix) -> Result<(), NavError> {
        self.feed.publish(fix)
    }

    pub fn state(&self) -> NavigationState {
        self.snapshot.borrow().clone()
    }

    pub fn view(&self) -> NavigationView {
        self.snapshot.borrow().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.snapshot.clone()
    }

    async fn send(&self, command: Command) -> Result<(), NavError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NavError::ServiceUnavailable)
    }
}

pub struct NavigationDriver {
    state: NavigationState,
    config: NavConfig,
    services: Services,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<NavigationState>,
    routes_tx: mpsc::UnboundedSender<RouteOutcome>,
    routes_rx: mpsc::UnboundedReceiver<RouteOutcome>,
    advance_timer: Option<Interval>,
    last_location_saved: Option<DateTime<Utc>>,
}

/// Spawn the driver task, restoring any saved session first.
pub fn spawn(
    config: NavConfig,
    geolocation: GeolocationOptions,
    services: Services,
) -> (NavigationHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = watch::channel(NavigationState::default());
    let (routes_tx, routes_rx) = mpsc::unbounded_channel();

    let handle = NavigationHandle {
        commands: commands_tx,
        snapshot: snapshot_rx,
        feed: services.feed.clone(),
        geolocation: geolocation.clone(),
        location_cache_ttl: config.location_cache_ttl(),
        clock: services.clock.clone(),
    };

    let mut driver = NavigationDriver {
        state: NavigationState::default(),
        config,
        services,
        commands: commands_rx,
        snapshot: snapshot_tx,
        routes_tx,
        routes_rx,
        advance_timer: None,
        last_location_saved: None,
    };
    driver.restore();
    driver.apply_seed(&geolocation);

    let task = tokio::spawn(driver.run());
    (handle, task)
}

impl NavigationDriver {
    fn now(&self) -> DateTime<Utc> {
        (self.services.clock)()
    }

    fn restore(&mut self) {
        let now = self.now();
        let record = match store::load_navigation(self.services.store.as_ref(), now) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!("failed to read saved navigation: {}", err);
                return;
            }
        };

        self.dispatch(NavEvent::Restore { record, now });
    }

    /// Apply the fix the feed was seeded with. The run loop never sees it as a
    /// change, so it is pushed through the reducer here.
    fn apply_seed(&mut self, geolocation: &GeolocationOptions) {
        let Some(fix) = self.services.feed.latest() else {
            return;
        };
        let now = self.now();
        let fresh = (now - fix.timestamp)
            .to_std()
            .map(|age| age <= geolocation.maximum_age)
            .unwrap_or(true);

        // A stale fix must not become the origin of a restored session; it
        // only places the user marker while idle.
        if fresh || self.state.phase == NavigationPhase::Idle {
            debug!("applying seeded position from {}", fix.timestamp);
            self.dispatch(NavEvent::PositionUpdate {
                position: fix.coordinate(),
                now,
            });
        }
    }

    pub async fn run(mut self) {
        let mut positions = self.services.feed.subscribe();
        let mut timeout_check = interval(self.config.timeout_check_interval());
        timeout_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("navigation driver started");
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                changed = positions.changed() => Wake::Position { feed_open: changed.is_ok() },
                Some(outcome) = self.routes_rx.recv() => Wake::Route(outcome),
                _ = next_advance(&mut self.advance_timer) => Wake::Advance,
                _ = timeout_check.tick() => Wake::TimeoutCheck,
            };

            match wake {
                Wake::Command(Some(command)) => self.handle_command(command),
                Wake::Command(None) => break,
                Wake::Position { feed_open: false } => break,
                Wake::Position { feed_open: true } => {
                    let latest = *positions.borrow_and_update();
                    if let Some(fix) = latest {
                        self.handle_position(fix);
                    }
                }
                Wake::Route((session_id, outcome)) => {
                    let now = self.now();
                    self.dispatch(NavEvent::RouteResolved {
                        session_id,
                        outcome,
                        now,
                    });
                }
                Wake::Advance => {
                    let now = self.now();
                    self.dispatch(NavEvent::Tick { now });
                }
                Wake::TimeoutCheck => {
                    let now = self.now();
                    self.dispatch(NavEvent::CheckTimeout { now });
                }
            }
        }
        info!("navigation driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.now();
        match command {
            Command::Start {
                destination,
                position,
                follow_camera,
                reply,
            } => {
                let event = NavEvent::Start {
                    destination,
                    position: position.map(|fix| fix.coordinate()),
                    follow_camera,
                    now,
                };
                let result = self.try_dispatch(event).map(|()| self.state.view());
                if let Err(err) = &result {
                    info!("navigation not started: {}", err);
                }
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                self.dispatch(NavEvent::Cancel { now });
                let _ = reply.send(self.state.view());
            }
            Command::SetFollowCamera { follow, reply } => {
                self.dispatch(NavEvent::SetFollowCamera { follow, now });
                let _ = reply.send(self.state.view());
            }
        }
    }

    fn handle_position(&mut self, fix: PositionFix) {
        let now = self.now();
        let save_due = self
            .last_location_saved
            .map_or(true, |saved| now - saved >= chrono::Duration::seconds(30));
        if save_due {
            match store::save_last_location(self.services.store.as_ref(), &fix) {
                Ok(()) => self.last_location_saved = Some(now),
                Err(err) => warn!("failed to cache last location: {}", err),
            }
        }

        self.dispatch(NavEvent::PositionUpdate {
            position: fix.coordinate(),
            now,
        });
    }

    /// Dispatch an event whose failure has no caller to report to.
    fn dispatch(&mut self, event: NavEvent) {
        if let Err(err) = self.try_dispatch(event) {
            warn!("navigation event rejected: {}", err);
        }
    }

    fn try_dispatch(&mut self, event: NavEvent) -> Result<(), NavError> {
        let transition = reduce(&self.state, event, &self.config)?;
        self.on_transition(transition);

        if self.state.phase.is_terminal() {
            let reset = reduce(&self.state, NavEvent::Reset, &self.config)?;
            self.on_transition(reset);
        }

        self.snapshot.send_replace(self.state.clone());
        Ok(())
    }

    fn on_transition(&mut self, transition: Transition) {
        if transition.state.phase != self.state.phase {
            info!(
                "navigation {:?} -> {:?} (session {})",
                self.state.phase, transition.state.phase, transition.state.session_id
            );
        }
        self.state = transition.state;
        for effect in transition.effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Persist(record) => {
                if let Err(err) = store::save_navigation(self.services.store.as_ref(), &record) {
                    warn!("failed to persist navigation: {}", err);
                }
            }
            Effect::ClearPersisted => {
                if let Err(err) = store::clear_navigation(self.services.store.as_ref()) {
                    warn!("failed to clear navigation: {}", err);
                }
            }
            Effect::RequestRoute {
                session_id,
                origin,
                destination,
            } => {
                let provider = self.services.provider.clone();
                let routes = self.routes_tx.clone();
                debug!("requesting route for session {}", session_id);
                tokio::spawn(async move {
                    let outcome = provider.request_route(origin, destination).await;
                    let _ = routes.send((session_id, outcome));
                });
            }
            Effect::StartAdvanceTimer => {
                let period = self.config.advance_interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.advance_timer = Some(timer);
            }
            Effect::StopAdvanceTimer => self.advance_timer = None,
            Effect::Camera(command) => self.services.renderer.apply(command),
            Effect::Notify(notice) => info!("navigation notice: {:?}", notice),
        }
    }
}

async fn next_advance(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
