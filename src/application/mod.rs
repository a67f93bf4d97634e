//! Use cases over the ledger: account management, transfers and integrity
//! checks. Every client (CLI, RPC handlers) goes through [`LedgerService`].

mod error;
mod service;
mod transfer;

pub use error::*;
pub use service::*;
pub use transfer::*;
