//! Load generating client: connections, lanes and their send loops.

mod channel;
mod driver;
mod pool;
mod scenario;

pub use self::{
    channel::{ResponseStream, RpcChannel},
    driver::{DriverShutdown, WorkloadDriver, WorkloadSpec},
    pool::{Connection, ConnectionPool},
    scenario::{ClientMark, ClientScenario},
};
