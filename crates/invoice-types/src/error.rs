use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypesError {
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error("Degenerate polygon on page {page}: {reason}")]
    DegeneratePolygon { page: u32, reason: String },

    #[error("Malformed extraction JSON: {0}")]
    Json(String),
}
