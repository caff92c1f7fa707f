use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One suggested fix inside a piece of feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub original: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Grammar or fluency feedback attached to a chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feedback {
    pub summary: String,
    #[serde(default)]
    pub corrections: Vec<Correction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

/// A single entry of a lesson transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    /// Scene-setting text injected by the lesson itself.
    System {
        text: String,
        sent_at: DateTime<Utc>,
    },
    User {
        text: String,
        sent_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<Feedback>,
    },
    Ai {
        text: String,
        sent_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<Feedback>,
    },
}

impl ChatMessage {
    #[must_use]
    pub fn system(text: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self::System {
            text: text.into(),
            sent_at,
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self::User {
            text: text.into(),
            sent_at,
            feedback: None,
        }
    }

    #[must_use]
    pub fn ai(text: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self::Ai {
            text: text.into(),
            sent_at,
            feedback: None,
        }
    }

    /// Attaches feedback to a user or AI turn. System messages are returned unchanged.
    #[must_use]
    pub fn with_feedback(self, feedback: Feedback) -> Self {
        match self {
            Self::User { text, sent_at, .. } => Self::User {
                text,
                sent_at,
                feedback: Some(feedback),
            },
            Self::Ai { text, sent_at, .. } => Self::Ai {
                text,
                sent_at,
                feedback: Some(feedback),
            },
            system @ Self::System { .. } => system,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::System { text, .. } | Self::User { text, .. } | Self::Ai { text, .. } => text,
        }
    }

    #[must_use]
    pub fn sent_at(&self) -> DateTime<Utc> {
        match self {
            Self::System { sent_at, .. } | Self::User { sent_at, .. } | Self::Ai { sent_at, .. } => {
                *sent_at
            }
        }
    }

    #[must_use]
    pub fn feedback(&self) -> Option<&Feedback> {
        match self {
            Self::System { .. } => None,
            Self::User { feedback, .. } | Self::Ai { feedback, .. } => feedback.as_ref(),
        }
    }

    /// True for turns written by the learner.
    #[must_use]
    pub fn is_from_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }
}
