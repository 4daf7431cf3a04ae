//! Service layer
//!
//! What happens after a run succeeds: notification delivery through
//! pluggable transports and the start of a chained successor.
//!
//! Transports are trait-based to enable testing and substitution.

mod dispatcher;
mod notify;

// Re-export traits
pub use notify::{EmailTransport, TextTransport};

// Re-export implementations
pub use dispatcher::{CompletionDispatcher, CompletionHandle};
pub use notify::{LogTransport, WebhookTransport};
