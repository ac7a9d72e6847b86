use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Degenerate geometry on page {page}: {reason}")]
    Geometry { page: u32, reason: String },

    #[error("Failed to render page {page}: {reason}")]
    PageRender { page: u32, reason: String },

    #[error("No extracted field matches line item: {0}")]
    MatchNotFound(String),

    #[error("No clear region for the notes box on page {0}")]
    PlacementNotFound(u32),

    #[error("Failed to save document: {0}")]
    Save(String),

    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Canvas operation failed: {0}")]
    Canvas(String),
}

impl AnnotateError {
    /// Whether this error must abort the whole document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnnotateError::Save(_) | AnnotateError::ParseError(_))
    }
}

impl From<invoice_types::TypesError> for AnnotateError {
    fn from(err: invoice_types::TypesError) -> Self {
        match err {
            invoice_types::TypesError::DegeneratePolygon { page, reason } => {
                AnnotateError::Geometry { page, reason }
            }
            other => AnnotateError::ParseError(other.to_string()),
        }
    }
}
