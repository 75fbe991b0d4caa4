#![forbid(unsafe_code)]

pub mod access;
pub mod address;
pub mod cache;
pub mod common;
pub mod moderation;
pub mod policy;
pub mod ratelimit;
pub mod validation;

pub use common::{ContractViolation, ReasonCodeId, UnixTimeMs, Validate};
