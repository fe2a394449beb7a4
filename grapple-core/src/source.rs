//! # Method Sources
//!
//! A [`MethodSource`] answers two questions: "which methods exist" and "what is the schema of
//! method X". Three variants implement it:
//!
//! 1. **[`ReflectionMethodSource`]**: asks the server itself through the gRPC Server
//!    Reflection Protocol (`grpc.reflection.v1`). This is the default.
//! 2. **[`DescriptorSetMethodSource`]**: reads binary `FileDescriptorSet` files (protosets).
//! 3. **[`ProtoPathMethodSource`]**: compiles the `.proto` sources found under a set of
//!    directories with `protoc`, then behaves like a descriptor set source.
//!
//! [`SchemaConfig::select`] picks the variant: an explicit choice wins, otherwise protosets
//! are preferred over proto directories, and reflection is the fallback.
//! [`SchemaSource`] is the closed set of variants used by the CLI.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grapple_core::metadata::Metadata;
//! use grapple_core::source::{MethodSource, SchemaConfig, SchemaSource};
//! use std::path::PathBuf;
//!
//! # async fn run(channel: tonic::transport::Channel) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SchemaConfig {
//!     protosets: vec![PathBuf::from("echo.protoset")],
//!     ..Default::default()
//! };
//!
//! let kind = config.select()?;
//! let mut source = SchemaSource::open(kind, &config, channel, Metadata::default())?;
//! let method = source.method("echo.Echo.Echo").await?;
//! source.close()?;
//! # Ok(())
//! # }
//! ```
mod descriptor_set;
mod proto_path;
mod reflection;

pub use descriptor_set::DescriptorSetMethodSource;
pub use proto_path::{ProtoCompiler, ProtoPathMethodSource};
pub use reflection::ReflectionMethodSource;

use crate::{
    BoxError,
    metadata::Metadata,
    reflection::session::ReflectionError,
    registry::{DescriptorRegistry, RegistryError},
};
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::{fmt, future::Future, path::PathBuf, process::ExitStatus, str::FromStr};
use tonic::{client::GrpcService, transport::Channel};

/// Errors raised while discovering a schema.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Symbol '{0}' not found")]
    NotFound(String),
    #[error("Reflection resolution failed")]
    Reflection(#[from] ReflectionError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Failed to read descriptor set '{path}'")]
    ReadDescriptorSet {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode descriptor set '{path}'")]
    DecodeDescriptorSet {
        path: PathBuf,
        source: prost::DecodeError,
    },
    #[error("Failed to walk proto path")]
    WalkProtoPath(#[from] walkdir::Error),
    #[error("Cannot find any .proto files in proto paths {0:?}")]
    NoProtoFiles(Vec<PathBuf>),
    #[error("Failed to create temporary descriptor set file")]
    TempFile(#[source] std::io::Error),
    #[error("Schema compiler '{0}' not found, install protoc or set PROTOC")]
    CompilerNotFound(String),
    #[error("Failed to run schema compiler '{program}'")]
    CompilerSpawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Schema compiler '{program}' failed: {status}")]
    CompilerFailed { program: String, status: ExitStatus },
}

/// The capability shared by every schema discovery strategy.
pub trait MethodSource {
    /// Enumerates every method the source can resolve.
    fn methods(&mut self) -> impl Future<Output = Result<Vec<MethodDescriptor>, DiscoveryError>>;

    /// Resolves a method by its full dotted name (e.g. `package.Service.Method`).
    fn method(
        &mut self,
        full_name: &str,
    ) -> impl Future<Output = Result<MethodDescriptor, DiscoveryError>>;

    /// Releases any live discovery session.
    fn close(&mut self) -> Result<(), DiscoveryError>;
}

fn lookup(
    registry: &DescriptorRegistry,
    full_name: &str,
) -> Result<MethodDescriptor, DiscoveryError> {
    registry
        .method(full_name)
        .ok_or_else(|| DiscoveryError::NotFound(full_name.to_string()))
}

/// The schema discovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Reflection,
    Protoset,
    ProtoPath,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Reflection => f.write_str("reflection"),
            SchemaKind::Protoset => f.write_str("protoset"),
            SchemaKind::ProtoPath => f.write_str("protopath"),
        }
    }
}

impl FromStr for SchemaKind {
    type Err = SchemaConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reflection" => Ok(SchemaKind::Reflection),
            "protoset" => Ok(SchemaKind::Protoset),
            "protopath" => Ok(SchemaKind::ProtoPath),
            other => Err(SchemaConfigError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaConfigError {
    #[error("Invalid schema source '{0}', expected one of: protoset, protopath, reflection")]
    UnknownKind(String),
    #[error("Schema source 'protoset' requires at least one descriptor set file")]
    MissingProtosets,
    #[error("Schema source 'protopath' requires at least one proto directory")]
    MissingProtoPaths,
}

/// Where the schema may come from, as configured by the user.
#[derive(Debug, Clone, Default)]
pub struct SchemaConfig {
    /// Explicit choice, overriding the inferred one.
    pub schema_from: Option<SchemaKind>,
    /// Binary `FileDescriptorSet` files.
    pub protosets: Vec<PathBuf>,
    /// Directories searched recursively for `.proto` files.
    pub proto_paths: Vec<PathBuf>,
}

impl SchemaConfig {
    /// Chooses the strategy: explicit choice, then protosets, then proto paths, then reflection.
    pub fn select(&self) -> Result<SchemaKind, SchemaConfigError> {
        let kind = match self.schema_from {
            Some(kind) => kind,
            None if !self.protosets.is_empty() => SchemaKind::Protoset,
            None if !self.proto_paths.is_empty() => SchemaKind::ProtoPath,
            None => SchemaKind::Reflection,
        };

        match kind {
            SchemaKind::Protoset if self.protosets.is_empty() => {
                Err(SchemaConfigError::MissingProtosets)
            }
            SchemaKind::ProtoPath if self.proto_paths.is_empty() => {
                Err(SchemaConfigError::MissingProtoPaths)
            }
            kind => Ok(kind),
        }
    }
}

/// The closed set of method sources, selected at runtime.
pub enum SchemaSource<S = Channel> {
    Reflection(ReflectionMethodSource<S>),
    DescriptorSet(DescriptorSetMethodSource),
    ProtoPath(ProtoPathMethodSource),
}

impl<S> SchemaSource<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Builds the source of the given kind.
    ///
    /// Local sources are built eagerly, so unreadable or unresolvable schemas fail here.
    /// The reflection source only attaches `discovery_metadata` to its session.
    pub fn open(
        kind: SchemaKind,
        config: &SchemaConfig,
        service: S,
        discovery_metadata: Metadata,
    ) -> Result<Self, DiscoveryError> {
        tracing::debug!(%kind, "opening method source");

        Ok(match kind {
            SchemaKind::Reflection => {
                SchemaSource::Reflection(ReflectionMethodSource::new(service, discovery_metadata))
            }
            SchemaKind::Protoset => SchemaSource::DescriptorSet(
                DescriptorSetMethodSource::from_files(&config.protosets)?,
            ),
            SchemaKind::ProtoPath => {
                SchemaSource::ProtoPath(ProtoPathMethodSource::new(&config.proto_paths)?)
            }
        })
    }
}

impl<S> MethodSource for SchemaSource<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn methods(&mut self) -> Result<Vec<MethodDescriptor>, DiscoveryError> {
        match self {
            SchemaSource::Reflection(source) => source.methods().await,
            SchemaSource::DescriptorSet(source) => source.methods().await,
            SchemaSource::ProtoPath(source) => source.methods().await,
        }
    }

    async fn method(&mut self, full_name: &str) -> Result<MethodDescriptor, DiscoveryError> {
        match self {
            SchemaSource::Reflection(source) => source.method(full_name).await,
            SchemaSource::DescriptorSet(source) => source.method(full_name).await,
            SchemaSource::ProtoPath(source) => source.method(full_name).await,
        }
    }

    fn close(&mut self) -> Result<(), DiscoveryError> {
        match self {
            SchemaSource::Reflection(source) => source.close(),
            SchemaSource::DescriptorSet(source) => source.close(),
            SchemaSource::ProtoPath(source) => source.close(),
        }
    }
}
