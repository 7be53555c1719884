//! Client-side UI state, independent of any renderer.

pub mod chat;
