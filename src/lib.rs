pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod ledger;
pub mod server;

pub use error::CustodyError;
