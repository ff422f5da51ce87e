pub mod config;
pub mod core;
pub mod error;
pub mod exchange;
pub mod models;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod storage;
#[cfg(test)]
pub mod test_helpers;
