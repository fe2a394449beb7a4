//! Method source backed by the gRPC Server Reflection Protocol.
use super::{DiscoveryError, MethodSource, lookup};
use crate::{
    BoxError,
    metadata::Metadata,
    reflection::session::{ReflectionError, ReflectionSession},
    registry::DescriptorRegistry,
};
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use tonic::{client::GrpcService, transport::Channel};

/// Discovers methods by asking the server over a single reflection session.
pub struct ReflectionMethodSource<S = Channel> {
    session: ReflectionSession<S>,
}

impl<S> ReflectionMethodSource<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates the source; the session carries `metadata` on its stream.
    pub fn new(service: S, metadata: Metadata) -> Self {
        Self {
            session: ReflectionSession::new(service, metadata),
        }
    }
}

fn symbol_error(symbol: &str, err: ReflectionError) -> DiscoveryError {
    if err.is_not_found() {
        DiscoveryError::NotFound(symbol.to_string())
    } else {
        DiscoveryError::Reflection(err)
    }
}

impl<S> MethodSource for ReflectionMethodSource<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Lists the services, fetches the files defining each of them and enumerates the methods
    /// of the resulting registry.
    async fn methods(&mut self) -> Result<Vec<MethodDescriptor>, DiscoveryError> {
        let services = self.session.list_services().await?;
        tracing::debug!(services = services.len(), "server listed its services");

        let mut files = Vec::new();
        for service in &services {
            let closure = self
                .session
                .file_containing_symbol(service)
                .await
                .map_err(|err| symbol_error(service, err))?;
            files.extend(closure);
        }

        let registry = DescriptorRegistry::from_files(files)?;
        Ok(registry.methods())
    }

    /// Fetches the file defining `full_name`, with its imports, and looks the method up.
    async fn method(&mut self, full_name: &str) -> Result<MethodDescriptor, DiscoveryError> {
        let files = self
            .session
            .file_containing_symbol(full_name)
            .await
            .map_err(|err| symbol_error(full_name, err))?;

        let registry = DescriptorRegistry::from_files(files)?;
        lookup(&registry, full_name)
    }

    fn close(&mut self) -> Result<(), DiscoveryError> {
        Ok(self.session.close()?)
    }
}
