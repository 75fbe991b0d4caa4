#![forbid(unsafe_code)]

pub mod access;
pub mod auth_cache;
pub mod clock;
pub mod config;
pub mod orchestrator;
pub mod token_cache;

#[cfg(test)]
pub(crate) mod testkit;
