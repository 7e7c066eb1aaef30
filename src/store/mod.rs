//! Weight-store persistence layer.

pub mod migrations;
pub mod sqlite;

pub use sqlite::{PairWeightRow, TagWeightRow, WeightStore};
