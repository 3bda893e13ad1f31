pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod messaging;
pub mod observability;
pub mod protocol;
pub mod validation;
