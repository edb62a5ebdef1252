//! Payment-gated content access over HTTP 402.
//!
//! Gates a decentralized creator marketplace: the `CreatorHub` contract on
//! Base holds listings, rentals, purchases, and subscriptions; this crate
//! answers unpaid requests with a 402 challenge priced from the live
//! on-chain state, verifies submitted settlement transactions, and issues
//! signed fetch instructions for content a wallet already has access to.
//!
//! The [`handlers`] module is the HTTP surface; [`verifier`] and
//! [`authorizer`] hold the protocol core; [`chain`] is the read-only RPC
//! boundary. [`payer`] is the client-side counterpart that executes the
//! payments a challenge demands.

pub mod auth;
pub mod authorizer;
pub mod chain;
pub mod from_env;
pub mod handlers;
pub mod idempotency;
pub mod network;
pub mod payer;
pub mod rate_limit;
pub mod sig_down;
pub mod signing;
pub mod storage;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod validation;
pub mod verifier;
