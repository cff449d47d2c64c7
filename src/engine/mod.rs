//! Swiss scheduling engine.
//!
//! - **standings**: idempotent score entries and ordered standings
//! - **pairing**: Swiss pairing with rematch avoidance and byes
//! - **completion**: exactly-once application of match results
//! - **state**: tournament lifecycle transitions

mod completion;
mod pairing;
mod standings;
mod state;

pub use completion::*;
pub use pairing::*;
pub use standings::*;
pub use state::*;
