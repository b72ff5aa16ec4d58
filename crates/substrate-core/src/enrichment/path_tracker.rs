//! Debug-path state machine, driven by the classifier's per-observation debug signal rather than
//! a timer — spec.md §4.5: "state machine with states {idle, potential_debug, active_debug,
//! resolved}".
//!
//! In-memory state (the error buffer and the running success count) belongs to the agent, not the
//! database, per spec.md §5's "in-memory agent state ... is owned by the agent and never shared"
//! — a server restart recovers only the durable half (the active path row and its waypoints) by
//! querying `status = 'active'`; an in-flight potential_debug buffer is lost and that is accepted
//! behavior, not a bug: three fresh errors after restart rebuild it.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use rusqlite::Connection;

use crate::model::{DebugPath, WaypointType};
use crate::repository::DebugPathRepository;

use super::llm::{DebugSignal, DebugSignalKind};

/// An error signal becomes a path trigger once three land within this window.
const ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);
const ERRORS_TO_ACTIVATE: usize = 3;
const SUCCESSES_TO_RESOLVE: usize = 3;
const CONFIDENCE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    PotentialDebug,
    ActiveDebug { path_id: String, consecutive_successes: usize },
    Resolved,
}

struct BufferedError {
    summary: String,
    observation_id: Option<String>,
    seen_at: SystemTime,
}

/// Owns the in-memory half of the path-tracking state machine for one project. The server holds
/// one of these per project it has seen a debug signal for.
pub struct PathTracker {
    state: TrackerState,
    error_buffer: VecDeque<BufferedError>,
}

impl Default for PathTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    PathStarted(DebugPath),
    WaypointAdded,
    PathResolved { path_id: String },
    NoOp,
}

impl PathTracker {
    pub fn new() -> Self {
        Self { state: TrackerState::Idle, error_buffer: VecDeque::new() }
    }

    /// Recover from a restart: if the project already has an active path, resume straight into
    /// `ActiveDebug` for it rather than `Idle` — a fresh error buffer is fine since the waypoint
    /// history already lives in the database.
    pub fn recover(conn: &Connection, project_hash: &str) -> crate::error::Result<Self> {
        let repo = DebugPathRepository::new(conn, project_hash);
        let mut tracker = Self::new();
        if let Some(active) = repo.active()? {
            tracker.state = TrackerState::ActiveDebug { path_id: active.id, consecutive_successes: 0 };
        }
        Ok(tracker)
    }

    fn prune_expired(&mut self, now: SystemTime) {
        while let Some(front) = self.error_buffer.front() {
            match now.duration_since(front.seen_at) {
                Ok(age) if age > ERROR_WINDOW => {
                    self.error_buffer.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Feed one classifier debug signal through the state machine, mutating an active path's
    /// waypoints/resolution in the database as the transitions dictate.
    pub fn handle_signal(
        &mut self,
        conn: &Connection,
        project_hash: &str,
        observation_id: Option<&str>,
        signal: &DebugSignal,
    ) -> crate::error::Result<TrackerEvent> {
        if signal.confidence < CONFIDENCE_THRESHOLD {
            return Ok(TrackerEvent::NoOp);
        }
        let repo = DebugPathRepository::new(conn, project_hash);
        let now = SystemTime::now();
        self.prune_expired(now);

        match (&mut self.state, signal.kind) {
            (TrackerState::Idle, DebugSignalKind::Error) => {
                self.error_buffer.push_back(BufferedError {
                    summary: waypoint_summary(signal, observation_id),
                    observation_id: observation_id.map(str::to_string),
                    seen_at: now,
                });
                self.state = TrackerState::PotentialDebug;
                Ok(TrackerEvent::NoOp)
            }
            (TrackerState::PotentialDebug, DebugSignalKind::Error) => {
                self.error_buffer.push_back(BufferedError {
                    summary: waypoint_summary(signal, observation_id),
                    observation_id: observation_id.map(str::to_string),
                    seen_at: now,
                });
                if self.error_buffer.len() >= ERRORS_TO_ACTIVATE {
                    let trigger = self
                        .error_buffer
                        .back()
                        .map(|e| e.summary.clone())
                        .unwrap_or_else(|| "repeated errors".to_string());
                    let path = repo.start(&trigger)?;
                    for buffered in self.error_buffer.drain(..) {
                        repo.add_waypoint(&path.id, WaypointType::Error, &buffered.summary, buffered.observation_id.as_deref())?;
                    }
                    self.state = TrackerState::ActiveDebug { path_id: path.id.clone(), consecutive_successes: 0 };
                    Ok(TrackerEvent::PathStarted(path))
                } else {
                    Ok(TrackerEvent::NoOp)
                }
            }
            (TrackerState::PotentialDebug, DebugSignalKind::Success | DebugSignalKind::Attempt) => {
                // A success or mere attempt before activation doesn't reset the buffer outright,
                // but it isn't evidence of a debug episode either; leave the buffer as-is and do
                // nothing, matching spec.md's silence on this transition.
                Ok(TrackerEvent::NoOp)
            }
            (TrackerState::ActiveDebug { path_id, consecutive_successes }, kind) => {
                let path_id = path_id.clone();
                let waypoint_type = signal.waypoint_hint.unwrap_or(match kind {
                    DebugSignalKind::Error => WaypointType::Error,
                    DebugSignalKind::Success => WaypointType::Success,
                    DebugSignalKind::Attempt => WaypointType::Attempt,
                });
                repo.add_waypoint(&path_id, waypoint_type, &waypoint_summary(signal, observation_id), observation_id)?;

                match kind {
                    DebugSignalKind::Error => {
                        *consecutive_successes = 0;
                        Ok(TrackerEvent::WaypointAdded)
                    }
                    DebugSignalKind::Success => {
                        *consecutive_successes += 1;
                        if *consecutive_successes >= SUCCESSES_TO_RESOLVE {
                            repo.add_waypoint(&path_id, WaypointType::Resolution, "auto-resolved after 3 consecutive successes", observation_id)?;
                            repo.resolve(&path_id, "auto-resolved after 3 consecutive successes", None)?;
                            self.state = TrackerState::Resolved;
                            Ok(TrackerEvent::PathResolved { path_id })
                        } else {
                            Ok(TrackerEvent::WaypointAdded)
                        }
                    }
                    DebugSignalKind::Attempt => Ok(TrackerEvent::WaypointAdded),
                }
            }
            (TrackerState::Idle | TrackerState::Resolved, DebugSignalKind::Success | DebugSignalKind::Attempt) => {
                Ok(TrackerEvent::NoOp)
            }
            (TrackerState::Resolved, DebugSignalKind::Error) => {
                // A resolved path doesn't reopen; a fresh error starts a brand-new episode.
                self.state = TrackerState::Idle;
                self.handle_signal(conn, project_hash, observation_id, signal)
            }
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }
}

fn waypoint_summary(signal: &DebugSignal, observation_id: Option<&str>) -> String {
    match observation_id {
        Some(id) => format!("{:?} signal (confidence {:.2}) from observation {id}", signal.kind, signal.confidence),
        None => format!("{:?} signal (confidence {:.2})", signal.kind, signal.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        migrations::apply_migrations(&c, false).unwrap();
        c
    }

    fn error_signal() -> DebugSignal {
        DebugSignal { kind: DebugSignalKind::Error, confidence: 0.9, waypoint_hint: None }
    }

    fn success_signal() -> DebugSignal {
        DebugSignal { kind: DebugSignalKind::Success, confidence: 0.9, waypoint_hint: None }
    }

    #[test]
    fn two_errors_do_not_activate_a_path() {
        let c = conn();
        let mut tracker = PathTracker::new();
        tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        assert_eq!(*tracker.state(), TrackerState::PotentialDebug);
        assert!(DebugPathRepository::new(&c, "proj-a").active().unwrap().is_none());
    }

    #[test]
    fn a_third_error_activates_a_path() {
        let c = conn();
        let mut tracker = PathTracker::new();
        for _ in 0..3 {
            tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        }
        assert!(matches!(tracker.state(), TrackerState::ActiveDebug { .. }));
        let active = DebugPathRepository::new(&c, "proj-a").active().unwrap().unwrap();
        assert_eq!(DebugPathRepository::new(&c, "proj-a").waypoints(&active.id).unwrap().len(), 3);
    }

    #[test]
    fn three_consecutive_successes_resolve_the_path() {
        let c = conn();
        let mut tracker = PathTracker::new();
        for _ in 0..3 {
            tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        }
        for _ in 0..3 {
            tracker.handle_signal(&c, "proj-a", None, &success_signal()).unwrap();
        }
        assert_eq!(*tracker.state(), TrackerState::Resolved);
        assert!(DebugPathRepository::new(&c, "proj-a").active().unwrap().is_none());
    }

    #[test]
    fn an_error_between_successes_resets_the_counter() {
        let c = conn();
        let mut tracker = PathTracker::new();
        for _ in 0..3 {
            tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        }
        tracker.handle_signal(&c, "proj-a", None, &success_signal()).unwrap();
        tracker.handle_signal(&c, "proj-a", None, &success_signal()).unwrap();
        tracker.handle_signal(&c, "proj-a", None, &error_signal()).unwrap();
        match tracker.state() {
            TrackerState::ActiveDebug { consecutive_successes, .. } => assert_eq!(*consecutive_successes, 0),
            other => panic!("expected ActiveDebug, got {other:?}"),
        }
    }

    #[test]
    fn signals_below_the_confidence_threshold_are_ignored() {
        let c = conn();
        let mut tracker = PathTracker::new();
        let weak = DebugSignal { kind: DebugSignalKind::Error, confidence: 0.2, waypoint_hint: None };
        tracker.handle_signal(&c, "proj-a", None, &weak).unwrap();
        assert_eq!(*tracker.state(), TrackerState::Idle);
    }
}
