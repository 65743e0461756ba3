//! Generated types and services of the `grpc.testing` benchmark contract.

#![allow(clippy::all, clippy::pedantic)]

tonic::include_proto!("grpc.testing");

pub use self::{
    benchmark_service_client::BenchmarkServiceClient,
    benchmark_service_server::{BenchmarkService, BenchmarkServiceServer},
    worker_service_client::WorkerServiceClient,
    worker_service_server::{WorkerService, WorkerServiceServer},
};
