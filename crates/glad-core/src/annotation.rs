//! Position annotation.
//!
//! Every identifier-bearing node gets an id equal to the table length at the
//! moment it is parsed, and its source position is appended. Ids are dense
//! and follow left-to-right parse order.

use serde::{Deserialize, Serialize};

use crate::span::Position;

/// Where an annotated node was parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: String,
    pub position: Position,
}

/// Append-only table from annotation id to source position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionTable {
    entries: Vec<SourcePosition>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position and return its id.
    pub fn annotate(&mut self, file: &str, position: Position) -> usize {
        let id = self.entries.len();
        self.entries.push(SourcePosition {
            file: file.to_string(),
            position,
        });
        id
    }

    pub fn get(&self, id: usize) -> Option<&SourcePosition> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SourcePosition)> {
        self.entries.iter().enumerate()
    }

    /// Drop annotations made after a checkpoint. Used only when the parser
    /// abandons a speculative parse, so the ids it hands out stay dense.
    pub(crate) fn rewind(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}
