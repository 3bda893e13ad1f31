pub mod clock;
pub mod domain;
pub mod error;
pub mod scroll;
pub mod service;
pub mod sla;
pub mod store;
