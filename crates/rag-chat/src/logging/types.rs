use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::chat::SessionId;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SessionCreated,
    MessageSent,
    QueryCondensed,
    RetrievalExecuted,
    HistoryModified,
    HistoryCleared,
    HistorySummarized,
    TranscriptSaved,
    LlmError,
    RetrievalError,
    SessionDestroyed,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionCreated => "session_created",
            Self::MessageSent => "message_sent",
            Self::QueryCondensed => "query_condensed",
            Self::RetrievalExecuted => "retrieval_executed",
            Self::HistoryModified => "history_modified",
            Self::HistoryCleared => "history_cleared",
            Self::HistorySummarized => "history_summarized",
            Self::TranscriptSaved => "transcript_saved",
            Self::LlmError => "llm_error",
            Self::RetrievalError => "retrieval_error",
            Self::SessionDestroyed => "session_destroyed",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub session_id: SessionId,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    // Context
    pub message_content: Option<String>,
    pub response_content: Option<String>,
    pub collection_name: Option<String>,

    // Metrics
    pub history_len: Option<usize>,
    pub chunk_count: Option<usize>,

    // Performance
    pub processing_time_ms: Option<u64>,
    pub llm_call_duration_ms: Option<u64>,
    pub retrieval_duration_ms: Option<u64>,

    // Error
    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,

    pub custom_fields: Option<HashMap<String, Value>>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(session_id: SessionId, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(session_id, activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(session_id: SessionId, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                session_id,
                activity_type,
                activity_status: ActivityStatus::Success,
                message_content: None,
                response_content: None,
                collection_name: None,
                history_len: None,
                chunk_count: None,
                processing_time_ms: None,
                llm_call_duration_ms: None,
                retrieval_duration_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
                custom_fields: None,
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.log.collection_name = Some(name.into());
        self
    }

    pub fn history_len(mut self, len: usize) -> Self {
        self.log.history_len = Some(len);
        self
    }

    pub fn chunk_count(mut self, count: usize) -> Self {
        self.log.chunk_count = Some(count);
        self
    }

    pub fn processing_time(mut self, ms: u64) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn llm_duration(mut self, ms: u64) -> Self {
        self.log.llm_call_duration_ms = Some(ms);
        self
    }

    pub fn retrieval_duration(mut self, ms: u64) -> Self {
        self.log.retrieval_duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    /// Add custom key-value data
    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log
            .custom_fields
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
