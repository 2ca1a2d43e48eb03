//! Supabase PostgREST implementation of the data-fetch seam.

pub mod client;
pub mod config;

pub use client::{QueryOptions, SupabaseClient, TableFetcher};
pub use config::SupabaseConfig;
