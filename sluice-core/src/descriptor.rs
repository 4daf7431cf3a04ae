//! Source and sink descriptors
//!
//! A descriptor identifies what a source or sink *is* (its capability: a flat
//! file format or a database protocol) and where it lives. Readers and writers
//! declare the capability they handle, and the pipeline compares the two before
//! accepting a configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Flat-file formats recognized from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
    Xml,
}

impl FileFormat {
    /// File extension for this format, without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
            FileFormat::Xml => "xml",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            "xml" => Some(FileFormat::Xml),
            _ => None,
        }
    }
}

/// Database protocols recognized from a connection-string scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbProtocol {
    Postgres,
    Mongodb,
}

impl DbProtocol {
    /// Canonical scheme name
    pub fn scheme(&self) -> &'static str {
        match self {
            DbProtocol::Postgres => "postgres",
            DbProtocol::Mongodb => "mongodb",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(DbProtocol::Postgres),
            "mongodb" | "mongodb+srv" => Some(DbProtocol::Mongodb),
            _ => None,
        }
    }
}

/// Whether a descriptor points at a flat file or a database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    File,
    Database,
}

/// What a reader or writer can handle: `{kind, format|protocol}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum Capability {
    File(FileFormat),
    Database(DbProtocol),
}

impl Capability {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Capability::File(_) => DescriptorKind::File,
            Capability::Database(_) => DescriptorKind::Database,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind() == DescriptorKind::File
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::File(format) => write!(f, "file/{}", format.extension()),
            Capability::Database(protocol) => write!(f, "database/{}", protocol.scheme()),
        }
    }
}

/// Errors produced while resolving a location token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("location is empty")]
    Empty,

    #[error("'{0}' has no file extension")]
    MissingExtension(String),

    #[error("unsupported file extension '.{0}'")]
    UnknownFormat(String),

    #[error("unsupported connection scheme '{0}://'")]
    UnknownProtocol(String),
}

/// Resolves a file path or connection string to a capability
///
/// Tokens containing `://` are treated as connection strings and resolved by
/// scheme; everything else is treated as a path and resolved by extension.
///
/// # Example
/// ```
/// use sluice_core::descriptor::{resolve, Capability, DbProtocol, FileFormat};
///
/// assert_eq!(resolve("data/users.CSV").unwrap(), Capability::File(FileFormat::Csv));
/// assert_eq!(
///     resolve("postgres://etl@localhost/warehouse").unwrap(),
///     Capability::Database(DbProtocol::Postgres)
/// );
/// ```
pub fn resolve(token: &str) -> Result<Capability, ResolveError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ResolveError::Empty);
    }

    if let Some((scheme, _)) = token.split_once("://") {
        return DbProtocol::from_scheme(scheme)
            .map(Capability::Database)
            .ok_or_else(|| ResolveError::UnknownProtocol(scheme.to_string()));
    }

    let ext = Path::new(token)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ResolveError::MissingExtension(token.to_string()))?;

    FileFormat::from_extension(ext)
        .map(Capability::File)
        .ok_or_else(|| ResolveError::UnknownFormat(ext.to_string()))
}

/// A configured pipeline source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub capability: Capability,
    /// File path or connection string
    pub location: String,
    /// Table or collection, required for database sources
    pub sub_resource: Option<String>,
}

/// Where a sink writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkTarget {
    File {
        directory: PathBuf,
        file_name: String,
    },
    Database {
        connection: String,
        collection: String,
    },
}

/// A configured pipeline sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkDescriptor {
    pub capability: Capability,
    pub target: SinkTarget,
}

impl SinkDescriptor {
    /// Full output path for file sinks
    pub fn file_path(&self) -> Option<PathBuf> {
        match &self.target {
            SinkTarget::File {
                directory,
                file_name,
            } => Some(directory.join(file_name)),
            SinkTarget::Database { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_file_extensions() {
        assert_eq!(resolve("a.csv"), Ok(Capability::File(FileFormat::Csv)));
        assert_eq!(resolve("dir/b.JSON"), Ok(Capability::File(FileFormat::Json)));
        assert_eq!(resolve("c.tar.xml"), Ok(Capability::File(FileFormat::Xml)));
    }

    #[test]
    fn test_resolve_connection_schemes() {
        assert_eq!(
            resolve("postgresql://u:p@host:5432/db"),
            Ok(Capability::Database(DbProtocol::Postgres))
        );
        assert_eq!(
            resolve("mongodb+srv://cluster0.example.net/test"),
            Ok(Capability::Database(DbProtocol::Mongodb))
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_tokens() {
        assert_eq!(resolve("   "), Err(ResolveError::Empty));
        assert_eq!(
            resolve("README"),
            Err(ResolveError::MissingExtension("README".to_string()))
        );
        assert_eq!(
            resolve("notes.txt"),
            Err(ResolveError::UnknownFormat("txt".to_string()))
        );
        assert_eq!(
            resolve("mysql://localhost/db"),
            Err(ResolveError::UnknownProtocol("mysql".to_string()))
        );
    }

    #[test]
    fn test_capability_display_and_kind() {
        let cap = Capability::Database(DbProtocol::Postgres);
        assert_eq!(cap.to_string(), "database/postgres");
        assert_eq!(cap.kind(), DescriptorKind::Database);
        assert!(Capability::File(FileFormat::Csv).is_file());
    }

    #[test]
    fn test_sink_file_path() {
        let sink = SinkDescriptor {
            capability: Capability::File(FileFormat::Csv),
            target: SinkTarget::File {
                directory: PathBuf::from("/tmp/out"),
                file_name: "users.csv".to_string(),
            },
        };
        assert_eq!(sink.file_path(), Some(PathBuf::from("/tmp/out/users.csv")));
    }
}
