//! Method source compiling `.proto` sources with `protoc`.
use super::{DescriptorSetMethodSource, DiscoveryError, MethodSource};
use prost_reflect::MethodDescriptor;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

const DEFAULT_COMPILER: &str = "protoc";

/// How to invoke the schema compiler.
#[derive(Debug, Clone)]
pub struct ProtoCompiler {
    program: OsString,
    temp_dir: Option<PathBuf>,
}

impl Default for ProtoCompiler {
    /// Uses `$PROTOC` when set, `protoc` from `PATH` otherwise.
    fn default() -> Self {
        let program = std::env::var_os("PROTOC").unwrap_or_else(|| DEFAULT_COMPILER.into());
        Self::new(program)
    }
}

impl ProtoCompiler {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            temp_dir: None,
        }
    }

    /// Directory receiving the temporary descriptor set, the system one by default.
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Compiles every `.proto` file found under `proto_paths` into one descriptor set source.
    ///
    /// The compiler writes to a private temporary file, removed on every exit path.
    /// Its output streams are inherited untouched.
    pub fn compile(
        &self,
        proto_paths: &[PathBuf],
    ) -> Result<DescriptorSetMethodSource, DiscoveryError> {
        let sources = find_proto_files(proto_paths)?;

        if sources.is_empty() {
            return Err(DiscoveryError::NoProtoFiles(proto_paths.to_vec()));
        }

        let output = match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(DiscoveryError::TempFile)?;

        let program = self.program.to_string_lossy().into_owned();

        let mut descriptor_set_out = OsString::from("--descriptor_set_out=");
        descriptor_set_out.push(output.path());

        let mut command = Command::new(&self.program);
        for path in proto_paths {
            command.arg("-I").arg(path);
        }
        command
            .arg("--include_imports")
            .arg(descriptor_set_out)
            .args(&sources);

        tracing::debug!(%program, sources = sources.len(), "compiling proto sources");

        let status = command.status().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DiscoveryError::CompilerNotFound(program.clone())
            } else {
                DiscoveryError::CompilerSpawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        if !status.success() {
            return Err(DiscoveryError::CompilerFailed { program, status });
        }

        let source = DescriptorSetMethodSource::from_files(&[output.path()])?;
        output.close().map_err(DiscoveryError::TempFile)?;

        Ok(source)
    }
}

/// Every `.proto` file below the given directories, in a stable order.
fn find_proto_files(proto_paths: &[PathBuf]) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = Vec::new();

    for root in proto_paths {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_proto_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    Ok(files)
}

fn is_proto_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "proto")
}

/// Serves methods compiled from `.proto` sources.
#[derive(Debug, Clone)]
pub struct ProtoPathMethodSource {
    inner: DescriptorSetMethodSource,
}

impl ProtoPathMethodSource {
    /// Compiles the sources below `proto_paths` with the default compiler.
    pub fn new(proto_paths: &[PathBuf]) -> Result<Self, DiscoveryError> {
        Self::with_compiler(&ProtoCompiler::default(), proto_paths)
    }

    pub fn with_compiler(
        compiler: &ProtoCompiler,
        proto_paths: &[PathBuf],
    ) -> Result<Self, DiscoveryError> {
        Ok(Self {
            inner: compiler.compile(proto_paths)?,
        })
    }
}

impl MethodSource for ProtoPathMethodSource {
    async fn methods(&mut self) -> Result<Vec<MethodDescriptor>, DiscoveryError> {
        self.inner.methods().await
    }

    async fn method(&mut self, full_name: &str) -> Result<MethodDescriptor, DiscoveryError> {
        self.inner.method(full_name).await
    }

    fn close(&mut self) -> Result<(), DiscoveryError> {
        self.inner.close()
    }
}
