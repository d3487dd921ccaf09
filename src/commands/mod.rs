pub mod accounts;
pub mod history;

pub use accounts::*;
pub use history::*;
