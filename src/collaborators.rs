//! External collaborator seams.
//!
//! Neither collaborator is implemented here. The engine only depends on these
//! traits:
//!
//! - [`ExpectedCountProvider`] decodes an expected item count from a rendered
//!   page. Its answer only corroborates the live count; it never replaces it.
//! - [`DocumentCompiler`] turns a complete chapter directory into a compiled
//!   artifact. The engine's only obligation is a directory of validly named,
//!   validly sized item files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::session::RenderSession;

/// Failure reported by a collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Decodes the expected item count of the page currently loaded in a session.
#[async_trait]
pub trait ExpectedCountProvider: Send + Sync {
    /// Attempts decoding with one candidate `key`.
    async fn expected_count(
        &self,
        session: &dyn RenderSession,
        key: &str,
    ) -> Result<u32, CollaboratorError>;
}

/// Compiles a complete chapter directory.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Returns the path of the produced artifact.
    async fn compile(&self, chapter_dir: &Path) -> Result<PathBuf, CollaboratorError>;
}
