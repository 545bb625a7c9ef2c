pub mod catalog;
pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod evm;
pub mod fee;
pub mod identifier;
pub mod ledger;
pub mod options;
pub mod order;
pub mod resolver;
pub mod round;
pub mod submission;
pub mod wallets;

pub mod test_helpers;

pub use error::{
    CallFailure,
    Error,
    ValidationError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
