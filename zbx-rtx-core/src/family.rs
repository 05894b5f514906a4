//! The closed classification taxonomy records are sorted into.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification tag derived from the basename of the file a record came
/// from. See [`Family::classify`] for the derivation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Problems,
    History,
    MainProcess,
    TaskManager,
    Other,
}

impl Family {
    /// All variants, in the priority order `classify` checks them.
    pub const ALL: [Family; 5] = [
        Family::Problems,
        Family::History,
        Family::MainProcess,
        Family::TaskManager,
        Family::Other,
    ];

    /// Derives the family from a file basename. First match wins:
    ///
    /// 1. starts with `problems-` -> `Problems`
    /// 2. starts with `history-` -> `History`
    /// 3. contains `main-process` -> `MainProcess`
    /// 4. contains `task-manager` -> `TaskManager`
    /// 5. otherwise -> `Other`
    ///
    /// Families 1 and 2 take priority over 3 and 4: a
    /// `problems-*-main-process-N.ndjson` file is `Problems`, not
    /// `MainProcess` — callers see the event domain, not the worker pool.
    pub fn classify(basename: &str) -> Family {
        if basename.starts_with("problems-") {
            Family::Problems
        } else if basename.starts_with("history-") {
            Family::History
        } else if basename.contains("main-process") {
            Family::MainProcess
        } else if basename.contains("task-manager") {
            Family::TaskManager
        } else {
            Family::Other
        }
    }

    /// The wire name used in query params and (via `as_str`) the `family`
    /// field of a stored envelope's `source`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Problems => "problems",
            Family::History => "history",
            Family::MainProcess => "main-process",
            Family::TaskManager => "task-manager",
            Family::Other => "other",
        }
    }

    /// The SSE event name broadcast for records of this family, i.e.
    /// `zabbix.<family>`.
    pub fn sse_event_name(&self) -> String {
        format!("zabbix.{}", self.as_str())
    }

    pub fn from_str_loose(value: &str) -> Option<Family> {
        Family::ALL.into_iter().find(|f| f.as_str() == value)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_wins_over_worker_substring() {
        assert_eq!(
            Family::classify("problems-host1-main-process-3.ndjson"),
            Family::Problems
        );
        assert_eq!(
            Family::classify("history-host1-task-manager-1.ndjson"),
            Family::History
        );
    }

    #[test]
    fn worker_substrings_when_no_prefix_match() {
        assert_eq!(Family::classify("raw-main-process-9.ndjson"), Family::MainProcess);
        assert_eq!(Family::classify("raw-task-manager-9.ndjson"), Family::TaskManager);
    }

    #[test]
    fn main_process_wins_when_both_worker_substrings_present() {
        // Neither prefix matches; main-process is checked before task-manager.
        assert_eq!(
            Family::classify("weird-main-process-task-manager.ndjson"),
            Family::MainProcess
        );
    }

    #[test]
    fn falls_back_to_other() {
        assert_eq!(Family::classify("notes.ndjson"), Family::Other);
    }

    #[test]
    fn round_trips_through_str() {
        for family in Family::ALL {
            assert_eq!(Family::from_str_loose(family.as_str()), Some(family));
        }
    }
}
