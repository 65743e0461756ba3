//! Benchmark service: the server side of every benchmark scenario.

mod listener;
mod scenario;
mod service;

pub use self::{listener::BenchmarkListener, scenario::ServerScenario, service::BenchmarkServer};
