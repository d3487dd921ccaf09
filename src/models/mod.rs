pub mod account;
pub mod snapshot;

pub use account::*;
pub use snapshot::*;
