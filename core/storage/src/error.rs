use thiserror::Error;
use zet_schemas::{SchemaError, WorkspaceId, ZettelId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("zettel not found: {0}")]
    ZettelNotFound(ZettelId),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::ZettelNotFound(_) | StoreError::WorkspaceNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
