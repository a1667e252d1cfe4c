use std::{collections::VecDeque, sync::Mutex};

use crate::models::CameraCommand;

/// Receiver of camera and overlay commands.
pub trait MapRenderer: Send + Sync {
    fn apply(&self, command: CameraCommand);
}

/// Buffers commands until the client polls for them.
pub struct CommandQueue {
    pending: Mutex<VecDeque<CameraCommand>>,
    capacity: usize,
}

impl CommandQueue {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn drain(&self) -> Vec<CameraCommand> {
        match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl MapRenderer for CommandQueue {
    fn apply(&self, command: CameraCommand) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        // Clients that stop polling only lose the oldest camera moves.
        if pending.len() >= self.capacity {
            pending.pop_front();
        }
        pending.push_back(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    fn set_view(lat: f64) -> CameraCommand {
        CameraCommand::SetView {
            center: Coordinate::new(lat, 76.95),
            zoom: 15.0,
        }
    }

    #[test]
    fn drain_returns_in_order_and_empties() {
        let queue = CommandQueue::default();
        queue.apply(set_view(11.0));
        queue.apply(CameraCommand::ClearRoute);

        let drained = queue.drain();
        assert_eq!(drained, vec![set_view(11.0), CameraCommand::ClearRoute]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = CommandQueue::new(2);
        queue.apply(set_view(11.0));
        queue.apply(set_view(11.1));
        queue.apply(set_view(11.2));
        assert_eq!(queue.drain(), vec![set_view(11.1), set_view(11.2)]);
    }

    #[test]
    fn commands_serialize_with_tag() {
        let json = serde_json::to_value(CameraCommand::FlyTo {
            center: Coordinate::new(11.0, 76.9),
            zoom: 15.0,
            duration_seconds: 1.5,
        })
        .unwrap();
        assert_eq!(json["command"], "flyTo");
        assert_eq!(json["durationSeconds"], 1.5);
    }
}
