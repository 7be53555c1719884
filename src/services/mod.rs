//! Domain services.
//!
//! Routes stay thin: they parse the request, call into a service, and map
//! the service error to an HTTP status. Services own validation and talk to
//! the [`crate::store::LedgerStore`] and [`crate::llm::LlmChat`] seams.

pub mod ledger;
pub mod relay;
