pub mod api;
pub mod bus;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod models;
pub mod store;

pub use error::{Error, Result};
