//! DuelSettle Ledger Gateway
//!
//! The boundary between round operations and the ledger that executes them.
//! Writes are submitted as transactions and only relied upon once confirmed;
//! [`GatewayClient`] bounds each call with a timeout, polls for confirmation
//! and resubmits the calls that are safe to repeat.

pub mod client;
pub mod config;
pub mod gateway;
pub mod in_process;

pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use gateway::{Call, CallOutput, LedgerGateway, TxReceipt, TxStatus};
pub use in_process::InProcessGateway;
