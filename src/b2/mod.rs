//! Backblaze B2 listing backend

pub mod client;
pub mod errors;
pub mod types;

pub use client::B2Client;
pub use errors::B2Error;
