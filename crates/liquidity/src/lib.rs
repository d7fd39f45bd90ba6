pub mod error;
pub mod ledger;

pub use error::*;
pub use ledger::*;
