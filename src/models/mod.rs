//! Core data models for the tournament scheduler.

mod ids;
mod match_record;
mod pairing;
mod score;
mod tournament;

pub use ids::*;
pub use match_record::*;
pub use pairing::*;
pub use score::*;
pub use tournament::*;
