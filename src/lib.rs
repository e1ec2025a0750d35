//! 21 Retos - entitlement and payment-reconciliation service
//!
//! This library provides the core subsystem for the 21 Retos program:
//! payment webhook ingestion (Stripe, Wompi), order recording, idempotent
//! entitlement activation, and at-least-once propagation of Agenda grants
//! to the external companion system via a durable retry outbox.

pub mod agenda;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jwt;
pub mod models;
pub mod notify;
pub mod outbox;
pub mod rate_limit;
pub mod util;
