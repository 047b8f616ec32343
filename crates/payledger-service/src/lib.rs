//! Payledger host service.
//!
//! Runs the payment account ledger as a process:
//!
//! - Signed settlement webhooks for the card and token gateways
//! - Background coupon expiry and pending-charge reconciliation
//! - A health probe
//!
//! # Webhook signatures
//!
//! Each rail has its own secret. The gateway sends the hex HMAC-SHA256 of the
//! raw body in `x-gateway-signature`; unsigned or mis-signed deliveries are
//! rejected with 401.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod hooks;
pub mod routes;
pub mod state;
pub mod worker;

pub use config::{GatewayEndpoint, ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use gateway::{GatewayClientError, HttpGateway};
pub use hooks::{HostHooks, NoopHooks};
pub use routes::create_router;
pub use state::{open_store, AppState};
pub use worker::Workers;
