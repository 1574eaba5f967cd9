//! Session lifecycle enum as the single source of truth for event names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind carried by learning objective logs.
pub const LEARNING_OBJECTIVE_KIND: &str = "learning_objective";

/// A learning session lifecycle transition.
///
/// Decoded once at ingestion. Names that are not lifecycle transitions are
/// kept verbatim in [`Lifecycle::Unknown`] so they can be reported but never
/// influence reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Started,
    Paused,
    Resumed,
    Completed,
    Exited,
    Unknown(String),
}

impl Lifecycle {
    /// Canonical name of the transition.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Exited => "exited",
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns false for [`Lifecycle::Unknown`].
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub const fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub const fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed)
    }

    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl From<&str> for Lifecycle {
    fn from(s: &str) -> Self {
        match s {
            "started" => Self::Started,
            "paused" => Self::Paused,
            "resumed" => Self::Resumed,
            "completed" => Self::Completed,
            "exited" => Self::Exited,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Lifecycle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Lifecycle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}
