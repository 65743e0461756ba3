pub mod env;
pub mod os;
pub mod rt;
pub mod telemetry;
