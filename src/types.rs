use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier handed out by `submit`
pub type RequestId = Uuid;

/// Priority lane a request is admitted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Lanes in dispatch order, highest first
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Position of this priority in `ALL`
    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Submitted,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RequestState {
    /// Completed and Failed are final
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Submitted, Queued)
                | (Submitted, Completed)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Submitted => "submitted",
            RequestState::Queued => "queued",
            RequestState::Processing => "processing",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Answer to `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub request_id: RequestId,
    pub state: RequestState,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to `get_result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultReport {
    Ready { embedding: Vec<f32>, cache_hit: bool },
    NotReady { state: RequestState },
    Failed { error: String },
}

/// Detailed view of a tracked request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub request_id: RequestId,
    pub text_preview: String,
    pub priority: Priority,
    pub state: RequestState,
    pub cache_hit: bool,
    pub queue_position: Option<usize>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub queue_entered_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of an inline `embed_sync` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEmbedding {
    pub embedding: Vec<f32>,
    pub cache_hit: bool,
}

/// Number of tracked requests in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub submitted: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.submitted + self.queued + self.processing + self.completed + self.failed
    }
}

/// Per-priority counter set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl PriorityCounts {
    pub fn get(&self, priority: Priority) -> u64 {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    pub(crate) fn increment(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

/// Current depth of each lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneDepths {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl LaneDepths {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Operational summary for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub dispatcher_running: bool,
    pub lane_depths: LaneDepths,
    pub in_flight: u64,
    pub cache_entries: usize,
    pub cache_hit_ratio: f64,
    pub total_requests_processed: u64,
    pub avg_processing_time_ms: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_dispatch_order() {
        assert_eq!(Priority::ALL, [Priority::High, Priority::Medium, Priority::Low]);
        for (i, priority) in Priority::ALL.iter().enumerate() {
            assert_eq!(priority.index(), i);
        }
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_serde_names() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(parsed, Priority::Low);
    }

    #[test]
    fn test_state_transitions() {
        use RequestState::*;
        assert!(Submitted.can_transition_to(Queued));
        assert!(Submitted.can_transition_to(Completed));
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Queued));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Completed.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(!RequestState::Queued.is_terminal());
        assert!(!RequestState::Processing.is_terminal());
    }

    #[test]
    fn test_result_report_serialization() {
        let report = ResultReport::NotReady { state: RequestState::Queued };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "not_ready");
        assert_eq!(json["state"], "queued");
    }
}
