//! Client-side entity cache and optimistic mutation coordinator for the clinic app.
//!
//! [`client::ClinicClient`] is the entry point. It owns an [`cache::EntityCache`], an
//! [`router::InvalidationRouter`] that keeps registered queries fresh, and a
//! [`coordinator::MutationCoordinator`] that applies changes speculatively and rolls
//! them back when the backend refuses. The backend itself is any
//! [`command::CommandInvoker`]; [`store::SqliteCommandLayer`] is the in-process one.

pub mod active_household;
pub mod cache;
pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod entities;
pub mod error;
pub mod id;
pub mod logging;
pub mod metrics;
pub mod mutation;
mod mutation_log;
pub mod queries;
pub mod router;
pub mod store;
pub mod time;
pub mod transform;
pub mod util;
pub mod validation;

pub use client::ClinicClient;
pub use error::{AppError, AppResult};
pub use logging::{init_file_logging, init_logging};
