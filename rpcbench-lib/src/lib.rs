#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod client;
pub mod config;
pub mod histogram;
pub mod load;
pub mod payload;
pub mod proto;
pub mod server;
pub mod tls;
pub mod utils;
pub mod worker;
