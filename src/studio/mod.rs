//! AI proxy: forwards storyboard requests to the model provider.

pub mod client;
pub mod config;
pub mod handler;

pub use client::StudioClient;
pub use config::StudioConfig;
