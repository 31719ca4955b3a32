//! Routing hints a component may expose after an invocation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing preference biasing future calls toward a particular server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Affinity {
    /// No affinity; the sentinel that is never sent to clients.
    None,
    /// Pinned to the in-process node.
    Local,
    /// Pinned to a named node.
    Node(String),
    /// Any member of a named cluster.
    Cluster(String),
    /// A specific endpoint URI.
    Uri(String),
}

impl Affinity {
    /// Returns `true` for the "no affinity" sentinel.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns `true` for node affinities, which clients derive themselves
    /// and therefore never receive as a strong affinity update.
    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => formatter.write_str("none"),
            Self::Local => formatter.write_str("local"),
            Self::Node(name) => write!(formatter, "node:{name}"),
            Self::Cluster(name) => write!(formatter, "cluster:{name}"),
            Self::Uri(uri) => write!(formatter, "uri:{uri}"),
        }
    }
}

/// Failure raised while computing an affinity hint.
#[derive(Debug, Error)]
#[error("failed to compute affinity for {component}: {message}")]
pub struct AffinityError {
    component: String,
    message: String,
}

impl AffinityError {
    /// Builds an affinity error for the named component.
    #[must_use]
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Name of the component whose hint could not be computed.
    #[must_use]
    pub fn component(&self) -> &str {
        self.component.as_str()
    }
}
