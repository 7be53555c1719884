//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Handlers are stateless: every balance and ledger mutation goes through
//! the [`LedgerStore`], so no in-process memory is shared between requests
//! beyond these handles.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::llm::LlmChat;
use crate::store::LedgerStore;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    /// Optional LLM client. `None` if the provider API key is not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub relay: Arc<RelayConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, llm: Option<Arc<dyn LlmChat>>, relay: RelayConfig) -> Self {
        Self { store, llm, relay: Arc::new(relay) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
