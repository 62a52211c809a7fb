//! Token endpoint transport used by the identity-platform client

mod client;

pub use client::{GrantReply, HttpClient, HttpClientBuilder};
