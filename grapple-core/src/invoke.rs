//! # Invocation Engine
//!
//! Drives one call of a resolved method, transcoding between line-delimited JSON and
//! `DynamicMessage`s of the method's input and output types.
//!
//! The [`CallShape`] is derived from the descriptor's streaming flags:
//!
//! * **Unary**: the whole input is read once and its first JSON value becomes the request.
//! * **ClientStream / ServerStream / BidiStream**: two pumps run concurrently for the
//!   duration of the call. The input pump decodes one message per input line and sends it;
//!   the output pump writes one JSON line per received message. The first error from either
//!   pump aborts the call and is the one returned, the other pump is dropped with it.
//!
//! When requested, response header and trailer metadata are written to a separate
//! diagnostics writer as a single JSON object once the call completes.
use crate::{
    BoxError,
    grpc::client::{GrpcClient, GrpcRequestError},
    metadata::{Metadata, metadata_to_json_map},
    transcode::{TranscodeError, decode_first, decode_line, encode_message},
};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, client::GrpcService, metadata::MetadataMap, transport::Channel};

/// Requests decoded ahead of the stream.
const SEND_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("gRPC client request error")]
    Request(#[from] GrpcRequestError),
    #[error("gRPC call failed")]
    Status(#[source] Status),
    #[error("The server closed the call without a response message")]
    MissingResponse,
    #[error("Failed to read input")]
    ReadInput(#[source] std::io::Error),
    #[error("Failed to write output")]
    WriteOutput(#[source] std::io::Error),
    #[error("Failed to serialize header/trailer metadata")]
    Diagnostics(#[source] serde_json::Error),
}

/// The four possible shapes of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl CallShape {
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => CallShape::Unary,
            (true, false) => CallShape::ClientStream,
            (false, true) => CallShape::ServerStream,
            (true, true) => CallShape::BidiStream,
        }
    }
}

/// Which response metadata to report on the diagnostics writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOptions {
    pub dump_header: bool,
    pub dump_trailer: bool,
}

#[derive(Serialize)]
struct HeaderTrailer {
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trailer: Option<BTreeMap<String, Vec<String>>>,
}

/// Executes calls over a connection, attaching the call metadata context to every request.
#[derive(Debug, Clone)]
pub struct Invoker<S = Channel> {
    client: GrpcClient<S>,
    metadata: Metadata,
    options: InvokeOptions,
}

impl<S> Invoker<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, metadata: Metadata, options: InvokeOptions) -> Self {
        Self {
            client: GrpcClient::new(service),
            metadata,
            options,
        }
    }

    /// Calls `method`, reading requests from `input` and writing responses to `output`.
    pub async fn invoke<R, W, D>(
        &mut self,
        method: &MethodDescriptor,
        input: R,
        output: &mut W,
        diagnostics: &mut D,
    ) -> Result<(), InvokeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        D: AsyncWrite + Unpin,
    {
        let shape = CallShape::of(method);
        tracing::debug!(method = %method.full_name(), ?shape, "invoking");

        let (header, trailer) = match shape {
            CallShape::Unary => self.unary(method, input, output).await?,
            _ => self.streaming(method, input, output).await?,
        };

        self.report_metadata(diagnostics, &header, trailer.as_ref())
            .await
    }

    async fn unary<R, W>(
        &mut self,
        method: &MethodDescriptor,
        mut input: R,
        output: &mut W,
    ) -> Result<(MetadataMap, Option<MetadataMap>), InvokeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut text = String::new();
        input
            .read_to_string(&mut text)
            .await
            .map_err(InvokeError::ReadInput)?;

        let request = decode_first(&method.input(), &text)?;

        let response = self
            .client
            .streaming(method, tokio_stream::once(request), &self.metadata)
            .await?
            .map_err(InvokeError::Status)?;

        let header = response.metadata().clone();
        let mut stream = response.into_inner();

        let reply = stream
            .message()
            .await
            .map_err(InvokeError::Status)?
            .ok_or(InvokeError::MissingResponse)?;
        let trailer = stream.trailers().await.map_err(InvokeError::Status)?;

        write_line(output, &encode_message(&reply, 0)?).await?;

        Ok((header, trailer))
    }

    async fn streaming<R, W>(
        &mut self,
        method: &MethodDescriptor,
        input: R,
        output: &mut W,
    ) -> Result<(MetadataMap, Option<MetadataMap>), InvokeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (requests, outgoing) = mpsc::channel(SEND_BUFFER);

        let Self {
            client, metadata, ..
        } = self;

        let input_pump = pump_input(input, method.input(), requests);

        let output_pump = async move {
            let response = client
                .streaming(method, ReceiverStream::new(outgoing), metadata)
                .await?
                .map_err(InvokeError::Status)?;

            let header = response.metadata().clone();
            let mut stream = response.into_inner();

            let mut index = 0;
            while let Some(message) = stream.message().await.map_err(InvokeError::Status)? {
                write_line(output, &encode_message(&message, index)?).await?;
                index += 1;
            }
            tracing::debug!(messages = index, "response stream finished");

            let trailer = stream.trailers().await.map_err(InvokeError::Status)?;
            Ok::<_, InvokeError>((header, trailer))
        };

        let ((), metadata) = tokio::try_join!(input_pump, output_pump)?;
        Ok(metadata)
    }

    async fn report_metadata<D>(
        &self,
        diagnostics: &mut D,
        header: &MetadataMap,
        trailer: Option<&MetadataMap>,
    ) -> Result<(), InvokeError>
    where
        D: AsyncWrite + Unpin,
    {
        if !self.options.dump_header && !self.options.dump_trailer {
            return Ok(());
        }

        let report = HeaderTrailer {
            header: self
                .options
                .dump_header
                .then(|| metadata_to_json_map(header)),
            trailer: self
                .options
                .dump_trailer
                .then(|| trailer.map(metadata_to_json_map).unwrap_or_default()),
        };

        let line = serde_json::to_string(&report).map_err(InvokeError::Diagnostics)?;
        write_line(diagnostics, &line).await
    }
}

/// Sends one message per non-blank input line, then half-closes the request stream.
async fn pump_input<R>(
    input: R,
    descriptor: MessageDescriptor,
    requests: mpsc::Sender<DynamicMessage>,
) -> Result<(), InvokeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await.map_err(InvokeError::ReadInput)? {
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let message = decode_line(&descriptor, &line, line_number)?;

        if requests.send(message).await.is_err() {
            // The call is over, its outcome is reported by the output pump.
            tracing::debug!(line = line_number, "request stream closed before end of input");
            break;
        }
    }

    tracing::debug!(lines = line_number, "input exhausted, closing send direction");
    Ok(())
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), InvokeError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(InvokeError::WriteOutput)?;
    writer
        .write_all(b"\n")
        .await
        .map_err(InvokeError::WriteOutput)?;
    writer.flush().await.map_err(InvokeError::WriteOutput)
}
