//! hawkBit status envelope sent as deployment feedback and identification.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Timestamp format used by the DDI API, e.g. `20260801T093000` (UTC).
const TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Result of the action this status reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finished {
    None,
    Success,
    Failure,
}

/// Execution state of the action this status reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Closed,
    Proceeding,
    Scheduled,
    Canceled,
    Rejected,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub finished: Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub result: StatusResult,
    pub execution: Execution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// The full status document.
///
/// `id` is omitted for the `configData` identification request, which is
/// also the only document carrying `data` (the device attribute map).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub time: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,
}

impl StatusDocument {
    /// Feedback for a specific action with a single detail message.
    pub fn feedback(id: &str, detail: &str, finished: Finished, execution: Execution) -> Self {
        StatusDocument {
            id: Some(id.to_owned()),
            time: now_timestamp(),
            status: Status {
                result: StatusResult { finished },
                execution,
                details: Some(vec![detail.to_owned()]),
            },
            data: None,
        }
    }

    /// Progress feedback: `finished=none, execution=proceeding`.
    pub fn progress(id: &str, detail: &str) -> Self {
        Self::feedback(id, detail, Finished::None, Execution::Proceeding)
    }

    /// Identification document carrying the device attributes.
    pub fn config_data(attributes: &BTreeMap<String, String>) -> Self {
        StatusDocument {
            id: None,
            time: now_timestamp(),
            status: Status {
                result: StatusResult {
                    finished: Finished::Success,
                },
                execution: Execution::Closed,
                details: None,
            },
            data: Some(attributes.clone()),
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}
