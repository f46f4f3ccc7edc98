//! Job phase state machine
//!
//! `New → Queued → Running → {Ok, Error, Deleted}`, with `Error` and `Deleted`
//! reachable from every active phase. `Stopped` is what a backend reports for a
//! job cancelled outside the dispatcher; it only ever moves on to `Deleted`.

use serde::{Deserialize, Serialize};

/// Execution phase of a job as tracked by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    New,
    Queued,
    Running,
    Ok,
    Error,
    Deleted,
    Stopped,
}

impl JobPhase {
    /// Phases no transition may leave
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Ok | JobPhase::Error | JobPhase::Deleted)
    }

    /// Phases in which the job may still make progress on a backend
    pub fn is_active(self) -> bool {
        matches!(self, JobPhase::New | JobPhase::Queued | JobPhase::Running)
    }

    /// Position along the forward path, used to keep transitions monotonic
    fn rank(self) -> u8 {
        match self {
            JobPhase::New => 0,
            JobPhase::Queued => 1,
            JobPhase::Running => 2,
            JobPhase::Stopped => 3,
            JobPhase::Ok | JobPhase::Error | JobPhase::Deleted => 4,
        }
    }

    /// Returns true if moving from `self` to `next` is a legal edge
    pub fn can_transition_to(self, next: JobPhase) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }

        match (self, next) {
            (JobPhase::Stopped, JobPhase::Deleted) => true,
            (JobPhase::Stopped, _) => false,
            // Ok is only ever reported for a job that reached the backend
            (JobPhase::New, JobPhase::Ok) => false,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobPhase::New => "NEW",
            JobPhase::Queued => "QUEUED",
            JobPhase::Running => "RUNNING",
            JobPhase::Ok => "OK",
            JobPhase::Error => "ERROR",
            JobPhase::Deleted => "DELETED",
            JobPhase::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobPhase; 7] = [
        JobPhase::New,
        JobPhase::Queued,
        JobPhase::Running,
        JobPhase::Ok,
        JobPhase::Error,
        JobPhase::Deleted,
        JobPhase::Stopped,
    ];

    #[test]
    fn test_forward_path() {
        assert!(JobPhase::New.can_transition_to(JobPhase::Queued));
        assert!(JobPhase::Queued.can_transition_to(JobPhase::Running));
        assert!(JobPhase::Running.can_transition_to(JobPhase::Ok));
        assert!(JobPhase::Running.can_transition_to(JobPhase::Error));
        // short jobs can finish between two polls
        assert!(JobPhase::Queued.can_transition_to(JobPhase::Ok));
    }

    #[test]
    fn test_no_backwards_moves() {
        assert!(!JobPhase::Running.can_transition_to(JobPhase::Queued));
        assert!(!JobPhase::Queued.can_transition_to(JobPhase::New));
        assert!(!JobPhase::New.can_transition_to(JobPhase::Ok));
    }

    #[test]
    fn test_terminal_phases_are_final() {
        for from in ALL.iter().filter(|p| p.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} must be rejected",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_cancellation_edges() {
        for from in [JobPhase::New, JobPhase::Queued, JobPhase::Running] {
            assert!(from.can_transition_to(JobPhase::Deleted));
            assert!(from.can_transition_to(JobPhase::Stopped));
            assert!(from.can_transition_to(JobPhase::Error));
        }
        assert!(JobPhase::Stopped.can_transition_to(JobPhase::Deleted));
        assert!(!JobPhase::Stopped.can_transition_to(JobPhase::Running));
        assert!(!JobPhase::Stopped.can_transition_to(JobPhase::Ok));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&JobPhase::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        let phase: JobPhase = serde_json::from_str("\"DELETED\"").unwrap();
        assert_eq!(phase, JobPhase::Deleted);
    }
}
