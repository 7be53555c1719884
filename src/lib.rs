//! Cataleya: token-metered chat relay.
//!
//! The server side (`routes`, `services`, `store`, `llm`) relays a
//! conversation to an OpenAI-compatible provider and charges the caller's
//! token balance with an atomic hold/settle. The client side (`net`, `ui`)
//! backs the `cataleya-chat` terminal client.

pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod net;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod ui;
