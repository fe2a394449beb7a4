//! # Reflection Session
//!
//! A long-lived `grpc.reflection.v1` bidirectional exchange.
//!
//! Servers which do not implement `v1` are asked through `grpc.reflection.v1alpha` instead.
//! Both versions carry the same messages, so the session speaks `v1` internally and transcodes
//! at the stream boundary.
//!
//! The session issues one request at a time and waits for its answer before sending the next.
//! The underlying stream is opened lazily together with the first request, so that servers
//! which only send response headers after reading a request do not stall the handshake.
//!
//! Besides `ListServices`, the session resolves `FileContainingSymbol` requests into a
//! closed set of files: whenever an answer references imports that were not received yet,
//! they are requested with `FileByFilename` until the import graph is complete. Files received
//! earlier on the same session are reused, as some servers never send a file twice on a stream.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::{
    BoxError,
    metadata::{Metadata, MetadataError},
};
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Streaming, client::GrpcService, transport::Channel};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use tonic_reflection::pb::v1alpha;

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error(
        "Failed to start a stream request with the reflection server, \
         reflection might not be supported"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("The reflection session has already been closed")]
    SessionClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto")]
    DecodeError(#[from] prost::DecodeError),

    #[error(transparent)]
    InvalidMetadata(#[from] MetadataError),
}

impl ReflectionError {
    /// Whether the server reported that the requested symbol or file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ReflectionError::ServerStreamFailure(status) => {
                status.code() == tonic::Code::NotFound
            }
            ReflectionError::ServerError { code, .. } => *code == tonic::Code::NotFound as i32,
            _ => false,
        }
    }
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

enum OpenStream {
    V1 {
        requests: mpsc::Sender<ServerReflectionRequest>,
        responses: Streaming<ServerReflectionResponse>,
    },
    V1Alpha {
        requests: mpsc::Sender<v1alpha::ServerReflectionRequest>,
        responses: Streaming<v1alpha::ServerReflectionResponse>,
    },
}

impl OpenStream {
    async fn send(&self, request: ServerReflectionRequest) -> Result<(), ReflectionError> {
        let sent = match self {
            OpenStream::V1 { requests, .. } => requests.send(request).await.is_ok(),
            OpenStream::V1Alpha { requests, .. } => {
                requests.send(transcode(&request)?).await.is_ok()
            }
        };

        if sent {
            Ok(())
        } else {
            Err(ReflectionError::SendFailed)
        }
    }

    async fn receive(&mut self) -> Result<Option<ServerReflectionResponse>, ReflectionError> {
        match self {
            OpenStream::V1 { responses, .. } => responses
                .message()
                .await
                .map_err(ReflectionError::ServerStreamFailure),
            OpenStream::V1Alpha { responses, .. } => responses
                .message()
                .await
                .map_err(ReflectionError::ServerStreamFailure)?
                .map(|response| transcode(&response))
                .transpose(),
        }
    }
}

/// Converts between the `v1` and `v1alpha` flavors of a message, which share one wire format.
fn transcode<M: Message, T: Message + Default>(message: &M) -> Result<T, ReflectionError> {
    Ok(T::decode(message.encode_to_vec().as_slice())?)
}

/// One reflection exchange, alive until [`ReflectionSession::close`] is called.
pub struct ReflectionSession<S = Channel> {
    client: ServerReflectionClient<S>,
    legacy_client: v1alpha::server_reflection_client::ServerReflectionClient<S>,
    metadata: Metadata,
    stream: Option<OpenStream>,
    closed: bool,
    files: HashMap<String, FileDescriptorProto>,
}

impl<S> ReflectionSession<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a session that will attach `metadata` to the reflection stream.
    pub fn new(service: S, metadata: Metadata) -> Self {
        Self {
            legacy_client: v1alpha::server_reflection_client::ServerReflectionClient::new(
                service.clone(),
            ),
            client: ServerReflectionClient::new(service),
            metadata,
            stream: None,
            closed: false,
            files: HashMap::new(),
        }
    }

    /// Lists the fully qualified names of every service exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        match self
            .exchange(MessageRequest::ListServices(String::new()))
            .await?
        {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Asks for the file defining `symbol` (e.g., `my.package.MyService`) and returns it
    /// together with every file it transitively imports.
    pub async fn file_containing_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let response = self
            .exchange(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await?;

        let roots = self.absorb(response)?;
        self.complete_imports(&roots).await?;

        Ok(self.closure(&roots))
    }

    /// Half-closes the send direction of the session.
    pub fn close(&mut self) -> Result<(), ReflectionError> {
        // Dropping the sender ends the request stream.
        self.stream = None;
        self.closed = true;
        Ok(())
    }

    async fn exchange(
        &mut self,
        request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionError> {
        if self.closed {
            return Err(ReflectionError::SessionClosed);
        }

        tracing::debug!(request = ?request, "sending reflection request");

        let request = ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(request),
        };

        match self.stream.as_mut() {
            Some(stream) => stream.send(request).await?,
            None => self.stream = Some(self.open(request).await?),
        }

        let stream = self.stream.as_mut().ok_or(ReflectionError::StreamClosed)?;

        let response = stream
            .receive()
            .await?
            .ok_or(ReflectionError::StreamClosed)?;

        match response.message_response {
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Ok(other),
            None => Err(ReflectionError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }

    /// Opens the stream with `first_request`, on `v1alpha` if the server lacks `v1`.
    async fn open(
        &mut self,
        first_request: ServerReflectionRequest,
    ) -> Result<OpenStream, ReflectionError> {
        let (requests, request) = self.start(first_request.clone()).await?;

        match self.client.server_reflection_info(request).await {
            Ok(response) => {
                return Ok(OpenStream::V1 {
                    requests,
                    responses: response.into_inner(),
                });
            }
            Err(status) if status.code() == tonic::Code::Unimplemented => {
                tracing::debug!("grpc.reflection.v1 is not implemented, trying v1alpha");
            }
            Err(status) => return Err(ReflectionError::ServerStreamInitFailed(status)),
        }

        let first_request: v1alpha::ServerReflectionRequest = transcode(&first_request)?;
        let (requests, request) = self.start(first_request).await?;

        let responses = self
            .legacy_client
            .server_reflection_info(request)
            .await
            .map_err(ReflectionError::ServerStreamInitFailed)?
            .into_inner();

        Ok(OpenStream::V1Alpha {
            requests,
            responses,
        })
    }

    /// Builds a request stream with `first` already buffered, so the call starts with it.
    async fn start<T>(
        &self,
        first: T,
    ) -> Result<(mpsc::Sender<T>, tonic::Request<ReceiverStream<T>>), ReflectionError> {
        let (tx, rx) = mpsc::channel(1);

        tx.send(first)
            .await
            .map_err(|_| ReflectionError::SendFailed)?;

        let mut request = tonic::Request::new(ReceiverStream::new(rx));
        self.metadata.apply(request.metadata_mut())?;

        Ok((tx, request))
    }

    /// Stores the files of a `FileDescriptorResponse`, returning their names.
    fn absorb(&mut self, response: MessageResponse) -> Result<Vec<String>, ReflectionError> {
        let raw_protos = match response {
            MessageResponse::FileDescriptorResponse(res) => res.file_descriptor_proto,
            other => return Err(unexpected(other)),
        };

        let mut names = Vec::with_capacity(raw_protos.len());

        for raw in raw_protos {
            let fd = FileDescriptorProto::decode(raw.as_ref())?;

            if let Some(name) = &fd.name {
                names.push(name.clone());
                self.files.entry(name.clone()).or_insert(fd);
            }
        }

        Ok(names)
    }

    /// Requests, one at a time, every import reachable from `roots` that was not received yet.
    async fn complete_imports(&mut self, roots: &[String]) -> Result<(), ReflectionError> {
        let mut pending: Vec<String> = roots.to_vec();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }

            if !self.files.contains_key(&name) {
                tracing::debug!(file = %name, "fetching missing import");
                let response = self
                    .exchange(MessageRequest::FileByFilename(name.clone()))
                    .await?;
                self.absorb(response)?;
            }

            // A server answering with other files than the requested one leaves a gap that
            // the registry will report as a missing import.
            if let Some(file) = self.files.get(&name) {
                pending.extend(file.dependency.iter().cloned());
            }
        }

        Ok(())
    }

    /// Every received file reachable from `roots` through imports.
    fn closure(&self, roots: &[String]) -> Vec<FileDescriptorProto> {
        let mut pending: Vec<&str> = roots.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(file) = self.files.get(name) {
                pending.extend(file.dependency.iter().map(String::as_str));
                out.push(file.clone());
            }
        }

        out
    }
}

fn unexpected(response: MessageResponse) -> ReflectionError {
    ReflectionError::UnexpectedResponseType(format!("{response:?}"))
}
