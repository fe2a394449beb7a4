//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! Every call shape travels over the same primitive, a stream of request messages answered by
//! a stream of response messages, since that is what gRPC puts on the wire for all four shapes.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Attaches a composed [`Metadata`] context to the outgoing request.
use super::codec::DynamicCodec;
use crate::{
    BoxError,
    metadata::{Metadata, MetadataError},
};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use tonic::{Response, Status, Streaming, client::GrpcService, transport::Channel};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid gRPC path '{0}'")]
    InvalidPath(String),
    #[error(transparent)]
    InvalidMetadata(#[from] MetadataError),
}

/// A generic gRPC client sending and receiving `DynamicMessage`s.
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Opens a stream on `method`, sending every message yielded by `messages`.
    ///
    /// The send direction is half-closed once `messages` ends.
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Response))` - The server answered with response headers.
    /// * `Ok(Err(Status))` - The server rejected the call.
    /// * `Err(GrpcRequestError)` - Failed to prepare or send the request.
    pub async fn streaming(
        &mut self,
        method: &MethodDescriptor,
        messages: impl Stream<Item = DynamicMessage> + Send + 'static,
        metadata: &Metadata,
    ) -> Result<Result<Response<Streaming<DynamicMessage>>, Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;

        let mut request = tonic::Request::new(messages);
        metadata.apply(request.metadata_mut())?;

        Ok(self.client.streaming(request, path, codec).await)
    }
}

/// Builds the `/package.Service/Method` path of a method.
pub fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}
