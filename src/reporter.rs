use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::create_timestamp;
use crate::queue::UsageQueue;
use crate::sandbox::{ExecutionOutcome, ExecutionRequest};

/// Shown in place of empty stdout of a successful run; only ever applied to the response
pub const NO_OUTPUT_PLACEHOLDER: &str = "No output";

/// Number of source characters kept in a usage record
pub const EXCERPT_CHARS: usize = 500;

/// Caller-facing body of `POST /api/execute`
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub output: String,
    pub error: Option<String>,
    pub execution_time_seconds: f64,
    pub language: String,
    pub success: bool,
}

/// What the persistence sink learns about each completed request
#[derive(Serialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UsageRecord {
    pub caller: String,
    pub language: String,
    pub code_excerpt: String,
    pub success: bool,
    pub outcome: String,
    pub execution_time_seconds: f64,
    pub created_time: String,
}

/// Turns outcomes into responses and hands usage records to the recorder
pub struct Reporter {
    queue: Arc<UsageQueue>,
}

impl Reporter {
    pub fn new(queue: Arc<UsageQueue>) -> Self {
        Self { queue }
    }

    /// Never waits on persistence: the record is queued, or dropped if the queue is full
    pub fn report(&self, request: &ExecutionRequest, outcome: ExecutionOutcome) -> ExecuteResponse {
        let execution_time_seconds = round_millis(outcome.elapsed.as_secs_f64());

        let record = UsageRecord {
            caller: request.caller.clone(),
            language: outcome.language.clone(),
            code_excerpt: excerpt(&request.code),
            success: outcome.success,
            outcome: outcome.kind.as_str().to_string(),
            execution_time_seconds,
            created_time: create_timestamp(),
        };
        if !self.queue.push(record) {
            log::warn!(
                "Usage queue full, dropped record for {} ({})",
                request.caller,
                outcome.language
            );
        }

        let output = if outcome.success && outcome.output.is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            outcome.output
        };

        ExecuteResponse {
            output,
            error: outcome.error,
            execution_time_seconds,
            language: outcome.language,
            success: outcome.success,
        }
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

fn excerpt(code: &str) -> String {
    code.chars().take(EXCERPT_CHARS).collect()
}
