//! Crate-level error aggregation.
//!
//! Modules define their own error enums; [`IndexError`] is what the
//! public entry points (`insert`, `search`, `build`, admin helpers)
//! return. Kinds map onto behavior: configuration and input errors abort
//! before side effects, remote errors stop the current batch with durable
//! partial progress, storage faults abort the enclosing transaction, and
//! corruption needs operator attention.

use miette::Diagnostic;
use thiserror::Error;

use crate::buffer::meta::BufferError;
use crate::config::ConfigError;
use crate::encoder::EncodeError;
use crate::id::IdError;
use crate::page::StorageError;
use crate::remote::RemoteError;

/// Any failure of an index operation.
#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Id(#[from] IdError),

    /// The query vector does not match the index dimensionality.
    #[error("query vector has {actual} dimensions, the index expects {expected}")]
    #[diagnostic(
        code(remora::index::query_dimensions),
        help("order by a vector with the index's dimensionality")
    )]
    QueryDimensions { expected: u32, actual: u32 },

    /// The caller cancelled a running scan.
    #[error("scan cancelled")]
    #[diagnostic(code(remora::index::cancelled))]
    Cancelled,

    /// A generated or supplied remote index name the service would refuse.
    #[error("remote index name {name:?} is invalid: {reason}")]
    #[diagnostic(
        code(remora::index::bad_index_name),
        help("names are at most 45 characters of alphanumerics and hyphens")
    )]
    BadIndexName { name: String, reason: String },

    /// The remote index never became ready within the build deadline.
    #[error("remote index {name} did not become ready within {seconds}s")]
    #[diagnostic(
        code(remora::index::build_timeout),
        help("check the remote service status, then retry the build")
    )]
    BuildTimeout { name: String, seconds: u64 },
}

pub type Result<T> = std::result::Result<T, IndexError>;
