//! The import pipeline: remote lookup, statement and badge merging, and the
//! per-entity and batch orchestration on top of them.

pub mod badges;
pub mod batch;
pub mod entity;
pub mod lookup;
pub mod statements;
