//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate provides a small `echo.Echo` gRPC server, with one method
//! per call shape, and its descriptor set. It backs the integration tests of `grapple-core`
//! and the `echo-server` binary used to try the `grapple` CLI by hand.
//!
//! Every response carries a `full-method` header naming the invoked method.
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming, metadata::KeyAndValueRef};

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub use pb::echo_server::{Echo as EchoService, EchoServer};
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");

use pb::{CountMessage, EchoMessage, MetadataMessage, PingMessage, metadata_message::Values};

/// Name of the response header carrying the invoked method.
pub const FULL_METHOD_HEADER: &str = "full-method";

fn with_full_method<T>(message: T, full_method: &'static str) -> Response<T> {
    let mut response = Response::new(message);
    response.metadata_mut().insert(
        FULL_METHOD_HEADER,
        tonic::metadata::MetadataValue::from_static(full_method),
    );
    response
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoServiceImpl;

type EchoStream = Pin<Box<dyn Stream<Item = Result<EchoMessage, Status>> + Send>>;

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    type ServerStreamEchoStream = ReceiverStream<Result<EchoMessage, Status>>;
    type BidiStreamEchoStream = EchoStream;

    async fn ping(&self, _request: Request<()>) -> Result<Response<PingMessage>, Status> {
        Ok(with_full_method(PingMessage { pong: true }, "/echo.Echo/Ping"))
    }

    async fn echo(&self, request: Request<EchoMessage>) -> Result<Response<EchoMessage>, Status> {
        Ok(with_full_method(request.into_inner(), "/echo.Echo/Echo"))
    }

    /// Answers with the number of messages received.
    async fn client_stream_echo(
        &self,
        request: Request<Streaming<EchoMessage>>,
    ) -> Result<Response<CountMessage>, Status> {
        let mut stream = request.into_inner();
        let mut count = 0;

        while let Some(message) = stream.next().await {
            message?;
            count += 1;
        }

        Ok(with_full_method(
            CountMessage { count },
            "/echo.Echo/ClientStreamEcho",
        ))
    }

    /// Streams `count` messages carrying `"0"`, `"1"`, ...
    async fn server_stream_echo(
        &self,
        request: Request<CountMessage>,
    ) -> Result<Response<Self::ServerStreamEchoStream>, Status> {
        let count = request.into_inner().count;
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for i in 0..count {
                let message = EchoMessage {
                    message: i.to_string(),
                };
                if tx.send(Ok(message)).await.is_err() {
                    break;
                }
            }
        });

        Ok(with_full_method(
            ReceiverStream::new(rx),
            "/echo.Echo/ServerStreamEcho",
        ))
    }

    async fn bidi_stream_echo(
        &self,
        request: Request<Streaming<EchoMessage>>,
    ) -> Result<Response<Self::BidiStreamEchoStream>, Status> {
        let mut incoming = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while let Some(result) = incoming.next().await {
                let stop = result.is_err();
                if tx.send(result).await.is_err() || stop {
                    break;
                }
            }
        });

        let stream: EchoStream = Box::pin(ReceiverStream::new(rx));
        Ok(with_full_method(stream, "/echo.Echo/BidiStreamEcho"))
    }

    /// Reflects the request metadata back, binary values decoded.
    async fn echo_metadata(
        &self,
        request: Request<()>,
    ) -> Result<Response<MetadataMessage>, Status> {
        let mut reply = MetadataMessage::default();

        for entry in request.metadata().iter() {
            let (key, value) = match entry {
                KeyAndValueRef::Ascii(key, value) => (
                    key.as_str().to_string(),
                    String::from_utf8_lossy(value.as_encoded_bytes()).into_owned(),
                ),
                KeyAndValueRef::Binary(key, value) => {
                    let bytes = value
                        .to_bytes()
                        .map_err(|_| Status::invalid_argument("malformed binary metadata"))?;
                    (
                        key.as_str().to_string(),
                        String::from_utf8_lossy(&bytes).into_owned(),
                    )
                }
            };

            reply
                .metadata
                .entry(key)
                .or_insert_with(Values::default)
                .values
                .push(value);
        }

        Ok(with_full_method(reply, "/echo.Echo/EchoMetadata"))
    }
}

/// Builds a `grpc.reflection.v1` service exposing [`FILE_DESCRIPTOR_SET`].
pub fn reflection_service() -> Result<
    tonic_reflection::server::v1::ServerReflectionServer<
        impl tonic_reflection::server::v1::ServerReflection,
    >,
    tonic_reflection::server::Error,
> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
}

/// Builds a `grpc.reflection.v1alpha` service exposing [`FILE_DESCRIPTOR_SET`], as older
/// servers do.
pub fn reflection_service_v1alpha() -> Result<
    tonic_reflection::server::v1alpha::ServerReflectionServer<
        impl tonic_reflection::server::v1alpha::ServerReflection,
    >,
    tonic_reflection::server::Error,
> {
    tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1alpha()
}
