#![forbid(unsafe_code)]

pub mod abi;
pub mod balance;
pub mod moderation;
pub mod rate_limit;
pub mod remote_reader;
pub mod resolver;
