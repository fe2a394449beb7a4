//! Method source backed by binary `FileDescriptorSet` files.
use super::{DiscoveryError, MethodSource, lookup};
use crate::registry::DescriptorRegistry;
use prost::Message;
use prost_reflect::MethodDescriptor;
use prost_types::FileDescriptorSet;
use std::path::Path;

/// Serves methods from descriptor sets loaded once, at construction time.
///
/// Every method of every file is listed, whether or not a server actually exposes it.
#[derive(Debug, Clone)]
pub struct DescriptorSetMethodSource {
    registry: DescriptorRegistry,
}

impl DescriptorSetMethodSource {
    /// Reads and concatenates the files of every descriptor set, then builds one registry.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, DiscoveryError> {
        let mut files = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let bytes = std::fs::read(path).map_err(|source| DiscoveryError::ReadDescriptorSet {
                path: path.to_path_buf(),
                source,
            })?;

            let set = FileDescriptorSet::decode(bytes.as_slice()).map_err(|source| {
                DiscoveryError::DecodeDescriptorSet {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

            tracing::debug!(
                path = %path.display(),
                files = set.file.len(),
                "loaded descriptor set"
            );
            files.extend(set.file);
        }

        Ok(Self {
            registry: DescriptorRegistry::from_files(files)?,
        })
    }

    /// Builds the source from an in-memory binary `FileDescriptorSet`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        Ok(Self {
            registry: DescriptorRegistry::decode(bytes)?,
        })
    }
}

impl MethodSource for DescriptorSetMethodSource {
    async fn methods(&mut self) -> Result<Vec<MethodDescriptor>, DiscoveryError> {
        Ok(self.registry.methods())
    }

    async fn method(&mut self, full_name: &str) -> Result<MethodDescriptor, DiscoveryError> {
        lookup(&self.registry, full_name)
    }

    fn close(&mut self) -> Result<(), DiscoveryError> {
        Ok(())
    }
}
