//! Wallet top-up service: signed payment gateway exchanges, idempotent
//! initiation and supervised reconciliation of open transactions.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
