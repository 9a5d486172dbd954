use thiserror::Error;

/// Errors surfaced at construction and relay startup. Everything that can go
/// wrong on the request path is logged instead, never returned.
#[derive(Debug, Error)]
pub enum Error {
    /// A standard metric definition was dropped or shadowed by a custom
    /// definition of a different kind, leaving no typed handle to record into.
    #[error("standard metric `{id}` is missing or has the wrong kind")]
    StandardCollectorMissing { id: &'static str },

    /// The push interval was zero; a zero-interval ticker would busy-loop.
    #[error("push interval must be non-zero")]
    InvalidPushInterval,

    /// The relay HTTP client could not be built.
    #[error("failed to build push relay HTTP client")]
    RelayClient(#[source] reqwest::Error),
}
