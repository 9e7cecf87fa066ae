//! API request handlers

mod agents;
mod chaos;
mod health;
mod messages;
mod recovery;

pub use agents::*;
pub use chaos::*;
pub use health::*;
pub use messages::*;
pub use recovery::*;
