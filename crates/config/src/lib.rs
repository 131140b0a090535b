//! Configuration types for cadre model bindings.
//!
//! A [`ModelConfig`] describes one provider/model pair an agent can be bound
//! to: inference parameters, credential lookup, and the open-ended
//! `provider_opts` table for provider-specific switches.

mod model;

pub use model::{ModelConfig, ProviderKind, ThinkingBudget, provider_opts};
