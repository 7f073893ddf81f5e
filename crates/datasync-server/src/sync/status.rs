//! Job lifecycle shared by import and export jobs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a job record.
///
/// ```text
/// Pending ──► InProgress ──► Completed
///    │            │    └───► Failed
///    │            ▼
///    └─────► Stopping ──► Stopped
/// ```
///
/// `Completed`, `Stopped` and `Failed` are terminal: once reached, neither
/// the status nor the counters change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Stopping")]
    Stopping,
    #[serde(rename = "Stopped")]
    Stopped,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Completed")]
    Completed,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::InProgress,
        Status::Stopping,
        Status::Stopped,
        Status::Failed,
        Status::Completed,
    ];

    /// Statuses from which the job can still be finalized
    pub const ACTIVE: [Status; 3] = [Status::Pending, Status::InProgress, Status::Stopping];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::InProgress => "In Progress",
            Status::Stopping => "Stopping",
            Status::Stopped => "Stopped",
            Status::Failed => "Failed",
            Status::Completed => "Completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Stopped | Status::Failed)
    }

    /// Whether a running chunk worker should give up on its remaining rows
    pub fn should_stop(self) -> bool {
        !matches!(self, Status::Pending | Status::InProgress)
    }

    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Pending, InProgress | Stopping | Completed | Failed)
                | (InProgress, Stopping | Completed | Failed)
                | (Stopping, Stopped | Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "pending" => Ok(Status::Pending),
            "in progress" | "inprogress" => Ok(Status::InProgress),
            "stopping" => Ok(Status::Stopping),
            "stopped" => Ok(Status::Stopped),
            "failed" => Ok(Status::Failed),
            "completed" => Ok(Status::Completed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_have_no_exit() {
        for from in Status::ALL.iter().filter(|s| s.is_terminal()) {
            for to in Status::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_stop_path() {
        assert!(Status::InProgress.can_transition_to(Status::Stopping));
        assert!(Status::Stopping.can_transition_to(Status::Stopped));
        assert!(!Status::Stopping.can_transition_to(Status::Completed));
        assert!(!Status::InProgress.can_transition_to(Status::Stopped));
    }

    #[test]
    fn test_should_stop() {
        assert!(!Status::Pending.should_stop());
        assert!(!Status::InProgress.should_stop());
        assert!(Status::Stopping.should_stop());
        assert!(Status::Completed.should_stop());
    }

    #[test]
    fn test_round_trip_strings() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert_eq!("in_progress".parse::<Status>().unwrap(), Status::InProgress);
        assert!("paused".parse::<Status>().is_err());
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"In Progress\"");
    }
}
