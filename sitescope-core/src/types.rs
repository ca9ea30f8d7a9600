//! Core type definitions for Sitescope.
//!
//! Defines the conversation messages passed as explicit context to the
//! completion service, and the validated research request that starts a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RequestError;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn of conversation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with the current timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

pub const MIN_BREADTH: u8 = 1;
pub const MAX_BREADTH: u8 = 10;
pub const DEFAULT_BREADTH: u8 = 3;
pub const MIN_DEPTH: u8 = 1;
pub const MAX_DEPTH: u8 = 5;
pub const DEFAULT_DEPTH: u8 = 2;

/// A validated request to research a topic.
///
/// Breadth and depth are clamped into `[1, 10]` and `[1, 5]` at construction;
/// a blank topic is rejected. Fields are private so a request cannot change
/// once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    topic: String,
    breadth: u8,
    depth: u8,
}

impl ResearchRequest {
    /// Build a request, clamping breadth and depth into their valid ranges.
    pub fn new(topic: impl Into<String>, breadth: u32, depth: u32) -> Result<Self, RequestError> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(RequestError::EmptyTopic);
        }

        let clamped_breadth = clamp_to(breadth, MIN_BREADTH, MAX_BREADTH);
        let clamped_depth = clamp_to(depth, MIN_DEPTH, MAX_DEPTH);
        if u32::from(clamped_breadth) != breadth || u32::from(clamped_depth) != depth {
            warn!(
                requested_breadth = breadth,
                requested_depth = depth,
                breadth = clamped_breadth,
                depth = clamped_depth,
                "Clamped research parameters into range"
            );
        }

        Ok(Self {
            topic,
            breadth: clamped_breadth,
            depth: clamped_depth,
        })
    }

    /// Build a request with the default breadth (3) and depth (2).
    pub fn with_defaults(topic: impl Into<String>) -> Result<Self, RequestError> {
        Self::new(topic, DEFAULT_BREADTH.into(), DEFAULT_DEPTH.into())
    }

    /// Build a quick request: two aspects, one iteration each.
    pub fn quick(topic: impl Into<String>) -> Result<Self, RequestError> {
        Self::new(topic, 2, 1)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn breadth(&self) -> u8 {
        self.breadth
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }
}

fn clamp_to(value: u32, min: u8, max: u8) -> u8 {
    value.clamp(u32::from(min), u32::from(max)) as u8
}
