use futures::{StreamExt as _, stream::BoxStream};
use rama::telemetry::tracing;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::{
    payload::{canned_response, make_response},
    proto::{BenchmarkService, BenchmarkServiceServer, SimpleRequest, SimpleResponse},
};

type ResponseStream = BoxStream<'static, Result<SimpleResponse, Status>>;

/// The benchmark service.
///
/// Clones share one kill switch: once [`BenchmarkServer::shutdown`] was
/// called every open response stream ends at its next emission, new ones
/// end right away. Unary calls keep being served.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkServer {
    kill: CancellationToken,
}

impl BenchmarkServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the kill switch. One way and idempotent.
    pub fn shutdown(&self) {
        if !self.kill.is_cancelled() {
            tracing::debug!("benchmark service kill switch fired");
        }
        self.kill.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.kill.is_cancelled()
    }

    pub fn into_service(self) -> BenchmarkServiceServer<Self> {
        BenchmarkServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl BenchmarkService for BenchmarkServer {
    async fn unary_call(&self, request: Request<SimpleRequest>) -> Result<Response<SimpleResponse>, Status> {
        make_response(request.get_ref()).map(Response::new)
    }

    type StreamingCallStream = ResponseStream;

    async fn streaming_call(
        &self,
        request: Request<Streaming<SimpleRequest>>,
    ) -> Result<Response<Self::StreamingCallStream>, Status> {
        let responses = request
            .into_inner()
            .map(|request| request.and_then(|request| make_response(&request)))
            .take_until(self.kill.clone().cancelled_owned());
        Ok(Response::new(responses.boxed()))
    }

    async fn streaming_from_client(
        &self,
        request: Request<Streaming<SimpleRequest>>,
    ) -> Result<Response<SimpleResponse>, Status> {
        let mut requests = request.into_inner();
        let mut last = None;
        while let Some(request) = requests.message().await? {
            last = Some(request);
        }
        let last = last.ok_or_else(|| Status::invalid_argument("client stream ended without any request"))?;
        make_response(&last).map(Response::new)
    }

    type StreamingFromServerStream = ResponseStream;

    async fn streaming_from_server(
        &self,
        request: Request<SimpleRequest>,
    ) -> Result<Response<Self::StreamingFromServerStream>, Status> {
        let response = make_response(request.get_ref())?;
        let responses = futures::stream::repeat_with(move || Ok::<_, Status>(response.clone()))
            .take_until(self.kill.clone().cancelled_owned());
        Ok(Response::new(responses.boxed()))
    }

    type StreamingBothWaysStream = ResponseStream;

    async fn streaming_both_ways(
        &self,
        request: Request<Streaming<SimpleRequest>>,
    ) -> Result<Response<Self::StreamingBothWaysStream>, Status> {
        let mut requests = request.into_inner();
        // child of the kill switch, also cancelled once the client half-closes
        let done = self.kill.child_token();

        tokio::spawn({
            let done = done.clone();
            async move {
                loop {
                    match requests.message().await {
                        Ok(Some(_)) => (),
                        Ok(None) => break,
                        Err(status) => {
                            tracing::debug!("both ways request stream failed: {status}");
                            break;
                        }
                    }
                }
                done.cancel();
            }
        });

        let response = canned_response();
        let responses = futures::stream::repeat_with(move || Ok::<_, Status>(response.clone())).take_until(done.cancelled_owned());
        Ok(Response::new(responses.boxed()))
    }
}
