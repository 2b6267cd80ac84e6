//! De Lijn Kern Open Data API integration.

mod client;
pub mod models;

pub use client::{DEFAULT_BASE_URL, DeLijnClient};
