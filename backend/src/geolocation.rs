//! Shared position feed.
//!
//! One long-lived watch for the whole process; navigation sessions subscribe
//! to it and never own it, so cancelling a session leaves the feed running.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::NavError;
use crate::models::PositionFix;

#[derive(Debug, Clone)]
pub struct GeolocationOptions {
    /// Reject fixes whose accuracy radius exceeds `max_accuracy_m`.
    pub high_accuracy: bool,
    pub max_accuracy_m: f64,
    /// How long to wait for a new fix.
    pub timeout: Duration,
    /// Oldest cached fix that still counts as current.
    pub maximum_age: Duration,
}

impl Default for GeolocationOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_accuracy_m: 100.0,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(30),
        }
    }
}

impl GeolocationOptions {
    fn accepts_accuracy(&self, fix: &PositionFix) -> bool {
        !self.high_accuracy || fix.accuracy <= self.max_accuracy_m
    }

    fn accepts_age(&self, fix: &PositionFix, now: DateTime<Utc>) -> bool {
        match (now - fix.timestamp).to_std() {
            Ok(age) => age <= self.maximum_age,
            // Timestamp slightly ahead of our clock.
            Err(_) => true,
        }
    }
}

#[derive(Clone)]
pub struct PositionFeed {
    tx: Arc<watch::Sender<Option<PositionFix>>>,
}

impl Default for PositionFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn seeded(fix: Option<PositionFix>) -> Self {
        let feed = Self::new();
        if let Some(fix) = fix {
            feed.tx.send_replace(Some(fix));
        }
        feed
    }

    /// Push a new fix to every subscriber.
    pub fn publish(&self, fix: PositionFix) -> Result<(), NavError> {
        if !fix.coordinate().is_valid() || !fix.accuracy.is_finite() || fix.accuracy < 0.0 {
            return Err(NavError::InvalidCoordinate {
                lat: fix.lat,
                lng: fix.lng,
            });
        }
        self.tx.send_replace(Some(fix));
        Ok(())
    }

    pub fn latest(&self) -> Option<PositionFix> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PositionFix>> {
        self.tx.subscribe()
    }

    /// A fix usable right now: the cached one if fresh enough, otherwise the
    /// next one published before `options.timeout` runs out.
    pub async fn current_position(
        &self,
        options: &GeolocationOptions,
        now: DateTime<Utc>,
    ) -> Result<PositionFix, NavError> {
        let mut rx = self.subscribe();
        let cached = *rx.borrow_and_update();
        if let Some(fix) = cached {
            if options.accepts_age(&fix, now) && options.accepts_accuracy(&fix) {
                return Ok(fix);
            }
        }

        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let next = *rx.borrow_and_update();
                if let Some(fix) = next {
                    if options.accepts_accuracy(&fix) {
                        return Some(fix);
                    }
                }
            }
        };

        match tokio::time::timeout(options.timeout, wait).await {
            Ok(Some(fix)) => Ok(fix),
            _ => Err(NavError::NoPosition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix_at(timestamp: DateTime<Utc>, accuracy: f64) -> PositionFix {
        PositionFix {
            lat: 11.0168,
            lng: 76.9558,
            accuracy,
            timestamp,
        }
    }

    #[tokio::test]
    async fn fresh_cached_fix_is_returned_immediately() {
        let now = Utc::now();
        let feed = PositionFeed::seeded(Some(fix_at(now, 10.0)));
        let fix = feed
            .current_position(&GeolocationOptions::default(), now)
            .await
            .unwrap();
        assert_eq!(fix.accuracy, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fix_without_update_is_no_position() {
        let now = Utc::now();
        let feed = PositionFeed::seeded(Some(fix_at(now - chrono::Duration::hours(2), 10.0)));
        let result = feed
            .current_position(&GeolocationOptions::default(), now)
            .await;
        assert!(matches!(result, Err(NavError::NoPosition)));
    }

    #[tokio::test]
    async fn waits_for_next_accurate_fix() {
        let now = Utc::now();
        let feed = PositionFeed::new();
        let publisher = feed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(fix_at(now, 500.0)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(fix_at(now, 8.0)).unwrap();
        });

        let fix = feed
            .current_position(&GeolocationOptions::default(), now)
            .await
            .unwrap();
        assert_eq!(fix.accuracy, 8.0);
    }

    #[test]
    fn publish_rejects_invalid_coordinates() {
        let feed = PositionFeed::new();
        let mut fix = fix_at(Utc::now(), 5.0);
        fix.lat = f64::NAN;
        assert!(feed.publish(fix).is_err());
        assert!(feed.latest().is_none());
    }
}
