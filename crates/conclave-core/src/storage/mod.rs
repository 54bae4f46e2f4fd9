//! Relational persistence for the decision graph: [`DecisionNode`],
//! [`crate::types::ParticipantStance`] and [`crate::types::DecisionSimilarity`] rows,
//! with foreign-key enforcement always on.

mod migrations;
mod sqlite;

pub use sqlite::Storage;
