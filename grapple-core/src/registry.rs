//! # Descriptor Registry
//!
//! A closed schema graph built from a `FileDescriptorSet`.
//!
//! Construction is atomic: files are deduplicated by name, every import edge is checked to
//! point at a file of the same set and the files are handed to `prost-reflect` in dependency
//! order. A registry is either fully resolved or not built at all. Once built it is never
//! mutated, so it can be queried concurrently without synchronization.
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool, MethodDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to decode file descriptor set")]
    Decode(#[from] prost::DecodeError),
    #[error("File descriptor without a name")]
    UnnamedFile,
    #[error("Conflicting definitions for file '{0}'")]
    ConflictingFile(String),
    #[error("File '{file}' imports '{import}', which is not present in the descriptor set")]
    MissingImport { file: String, import: String },
    #[error("Import cycle detected at file '{0}'")]
    ImportCycle(String),
    #[error("Failed to build descriptor registry")]
    Descriptor(#[from] DescriptorError),
}

/// An immutable, fully resolved set of schema files queried by full name.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
}

impl DescriptorRegistry {
    /// Decodes a binary `FileDescriptorSet` and builds a registry from it.
    pub fn decode(bytes: &[u8]) -> Result<Self, RegistryError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_files(set.file)
    }

    /// Builds a registry from files in any order.
    ///
    /// Byte-identical duplicates are collapsed, two different files sharing a name are rejected.
    pub fn from_files(
        files: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<Self, RegistryError> {
        let mut by_name: BTreeMap<String, FileDescriptorProto> = BTreeMap::new();

        for file in files {
            let name = file.name.clone().ok_or(RegistryError::UnnamedFile)?;
            match by_name.get(&name) {
                Some(existing) if *existing == file => {}
                Some(_) => return Err(RegistryError::ConflictingFile(name)),
                None => {
                    by_name.insert(name, file);
                }
            }
        }

        let ordered = dependency_order(&by_name)?;

        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: ordered.into_iter().cloned().collect(),
        })?;

        Ok(Self { pool })
    }

    /// Every method of every service declared in the registry's files.
    pub fn methods(&self) -> Vec<MethodDescriptor> {
        self.pool
            .files()
            .flat_map(|file| file.services().collect::<Vec<_>>())
            .flat_map(|service| service.methods().collect::<Vec<_>>())
            .collect()
    }

    /// Looks a method up by its full dotted name (e.g. `echo.Echo.Echo`).
    pub fn method(&self, full_name: &str) -> Option<MethodDescriptor> {
        let (service, method) = full_name.rsplit_once('.')?;

        self.pool
            .get_service_by_name(service)?
            .methods()
            .find(|m| m.name() == method)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Orders files so that every file comes after the files it imports.
fn dependency_order(
    files: &BTreeMap<String, FileDescriptorProto>,
) -> Result<Vec<&FileDescriptorProto>, RegistryError> {
    let mut state: HashMap<&str, Visit> = HashMap::new();
    let mut ordered = Vec::with_capacity(files.len());

    for name in files.keys() {
        visit(name, files, &mut state, &mut ordered)?;
    }

    Ok(ordered)
}

fn visit<'a>(
    name: &'a str,
    files: &'a BTreeMap<String, FileDescriptorProto>,
    state: &mut HashMap<&'a str, Visit>,
    ordered: &mut Vec<&'a FileDescriptorProto>,
) -> Result<(), RegistryError> {
    match state.get(name) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => return Err(RegistryError::ImportCycle(name.to_string())),
        None => {}
    }

    // Callers only pass names that are keys of `files` or checked imports.
    let Some(file) = files.get(name) else {
        return Ok(());
    };

    state.insert(name, Visit::InProgress);

    for import in &file.dependency {
        if !files.contains_key(import) {
            return Err(RegistryError::MissingImport {
                file: name.to_string(),
                import: import.clone(),
            });
        }
        visit(import, files, state, ordered)?;
    }

    state.insert(name, Visit::Done);
    ordered.push(file);

    Ok(())
}
