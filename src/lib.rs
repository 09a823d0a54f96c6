pub mod app;
pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod paths;
pub mod safe_string;
#[cfg(test)]
pub mod test_support;
pub mod transport;
