use futures::{StreamExt as _, stream::BoxStream};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, transport::Channel};

use crate::proto::{BenchmarkServiceClient, SimpleRequest, SimpleResponse};

pub type ResponseStream = BoxStream<'static, Result<SimpleResponse, Status>>;

/// The two call shapes a lane issues over one connection.
///
/// Implemented by the generated tonic client; tests provide in-memory
/// channels to observe lane behaviour.
pub trait RpcChannel: Clone + Send + Sync + 'static {
    fn unary(&self, request: SimpleRequest) -> impl Future<Output = Result<SimpleResponse, Status>> + Send;

    /// Open a bidirectional stream fed by `requests`.
    fn ping_pong(
        &self,
        requests: ReceiverStream<SimpleRequest>,
    ) -> impl Future<Output = Result<ResponseStream, Status>> + Send;
}

impl RpcChannel for BenchmarkServiceClient<Channel> {
    fn unary(&self, request: SimpleRequest) -> impl Future<Output = Result<SimpleResponse, Status>> + Send {
        let mut client = self.clone();
        async move {
            client
                .unary_call(request)
                .await
                .map(tonic::Response::into_inner)
        }
    }

    fn ping_pong(
        &self,
        requests: ReceiverStream<SimpleRequest>,
    ) -> impl Future<Output = Result<ResponseStream, Status>> + Send {
        let mut client = self.clone();
        async move {
            let response = client.streaming_call(requests).await?;
            Ok(response.into_inner().boxed())
        }
    }
}
