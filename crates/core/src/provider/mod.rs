//! Remote video provider abstraction.

mod runninghub;
mod types;

pub use runninghub::RunningHubProvider;
pub use types::*;
