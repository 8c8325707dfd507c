//! Certification requests and the selection modes they resolve to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::LogId;

/// Which records a certification covers. Exactly one mode per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// A single conversation, by ID.
    ByConversation(LogId),
    /// All conversations and conversation-less usage rows in `[start, end]`.
    ByDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Exactly these records, whether or not they were certified before.
    ByIds(Vec<LogId>),
    /// Every record never linked to any receipt.
    SinceLastReceipt,
}

impl Selector {
    /// `ByIds` is the only mode that may re-certify a record.
    pub fn bypasses_certified_filter(&self) -> bool {
        matches!(self, Selector::ByIds(_))
    }

    /// Whether selection must exclude records already linked to a receipt.
    ///
    /// Certifications in these modes must hold the owner's lock from
    /// selection through linking.
    pub fn excludes_certified(&self) -> bool {
        matches!(self, Selector::ByDateRange { .. } | Selector::SinceLastReceipt)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Selector::ByConversation(_) => "conversation",
            Selector::ByDateRange { .. } => "date_range",
            Selector::ByIds(_) => "log_ids",
            Selector::SinceLastReceipt => "since_last_receipt",
        }
    }
}

/// A certification request as received from a caller.
///
/// Criteria are plain optional fields; [`CertificationRequest::selector`]
/// checks that exactly one is present and well formed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log_ids: Option<Vec<String>>,
    #[serde(default)]
    pub since_last_receipt: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl CertificationRequest {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Self::default()
        }
    }

    pub fn log_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            log_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn since_last_receipt() -> Self {
        Self {
            since_last_receipt: true,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve the request to a single selection mode.
    pub fn selector(&self) -> Result<Selector, ValidationError> {
        let has_range = self.start_date.is_some() || self.end_date.is_some();

        let mut given = Vec::new();
        if self.conversation_id.is_some() {
            given.push("conversation_id");
        }
        if has_range {
            given.push("date_range");
        }
        if self.log_ids.is_some() {
            given.push("log_ids");
        }
        if self.since_last_receipt {
            given.push("since_last_receipt");
        }

        match given.len() {
            0 => return Err(ValidationError::NoCriteria),
            1 => {}
            _ => return Err(ValidationError::MultipleCriteria(given)),
        }

        if let Some(id) = &self.conversation_id {
            return Ok(Selector::ByConversation(LogId::parse(id.as_str())?));
        }

        if has_range {
            let (start, end) = match (self.start_date, self.end_date) {
                (Some(start), Some(end)) => (start, end),
                _ => return Err(ValidationError::IncompleteDateRange),
            };
            if start > end {
                return Err(ValidationError::InvertedDateRange);
            }
            return Ok(Selector::ByDateRange { start, end });
        }

        if let Some(ids) = &self.log_ids {
            if ids.is_empty() {
                return Err(ValidationError::EmptyIdList);
            }
            let mut parsed: Vec<LogId> = Vec::with_capacity(ids.len());
            for id in ids {
                let id = LogId::parse(id.as_str())?;
                if !parsed.contains(&id) {
                    parsed.push(id);
                }
            }
            return Ok(Selector::ByIds(parsed));
        }

        Ok(Selector::SinceLastReceipt)
    }
}
