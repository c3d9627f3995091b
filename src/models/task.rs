use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Mode-specific fields of a copy task.
///
/// Mock tasks paper-trade against a simulated ledger; Live tasks sign real
/// orders with `private_key` and settle on-chain through `operator_wallet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TaskMode {
    Mock {
        initial_finance: Decimal,
    },
    Live {
        operator_wallet: String,
        private_key: String,
        initial_finance: Decimal,
    },
}

impl TaskMode {
    pub fn is_live(&self) -> bool {
        matches!(self, TaskMode::Live { .. })
    }

    pub fn initial_finance(&self) -> Decimal {
        match self {
            TaskMode::Mock { initial_finance } => *initial_finance,
            TaskMode::Live {
                initial_finance, ..
            } => *initial_finance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Mock { .. } => "mock",
            TaskMode::Live { .. } => "live",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Stopped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// A registered copy-trading task. Stored as JSON in the shared task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(flatten)]
    pub mode: TaskMode,
    pub target_address: String,
    #[serde(default)]
    pub profile_url: Option<String>,
    /// Per-BUY notional in quote units (USDC).
    pub fixed_amount: Decimal,
    pub current_balance: Decimal,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_live(&self) -> bool {
        self.mode.is_live()
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Whether `current_balance` is maintained for this task.
    ///
    /// Mock always tracks; Live only when a starting balance was captured at
    /// creation.
    pub fn tracks_balance(&self) -> bool {
        match &self.mode {
            TaskMode::Mock { .. } => true,
            TaskMode::Live {
                initial_finance, ..
            } => *initial_finance > Decimal::ZERO,
        }
    }

    pub fn operator_wallet(&self) -> Option<&str> {
        match &self.mode {
            TaskMode::Live {
                operator_wallet, ..
            } => Some(operator_wallet),
            TaskMode::Mock { .. } => None,
        }
    }

    pub fn private_key(&self) -> Option<&str> {
        match &self.mode {
            TaskMode::Live { private_key, .. } => Some(private_key),
            TaskMode::Mock { .. } => None,
        }
    }
}

/// Validated input for creating a task. The store allocates the id, stamps
/// `created_at` and seeds `current_balance` from the mode's initial finance.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub mode: TaskMode,
    pub target_address: String,
    pub profile_url: Option<String>,
    pub fixed_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mock_task(initial: Decimal) -> Task {
        Task {
            id: Uuid::new_v4(),
            mode: TaskMode::Mock {
                initial_finance: initial,
            },
            target_address: "0xtarget".into(),
            profile_url: None,
            fixed_amount: dec!(100),
            current_balance: initial,
            status: TaskStatus::Running,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn mock_always_tracks_balance() {
        assert!(mock_task(dec!(0)).tracks_balance());
        assert!(mock_task(dec!(1000)).tracks_balance());
    }

    #[test]
    fn live_tracks_balance_only_with_initial_finance() {
        let mut task = mock_task(dec!(0));
        task.mode = TaskMode::Live {
            operator_wallet: "0xop".into(),
            private_key: "0xkey".into(),
            initial_finance: Decimal::ZERO,
        };
        assert!(!task.tracks_balance());

        task.mode = TaskMode::Live {
            operator_wallet: "0xop".into(),
            private_key: "0xkey".into(),
            initial_finance: dec!(250),
        };
        assert!(task.tracks_balance());
    }

    #[test]
    fn task_round_trips_through_json_with_flattened_mode() {
        let task = mock_task(dec!(1000));
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"mode\":\"mock\""));

        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.mode.initial_finance(), dec!(1000));
    }
}
