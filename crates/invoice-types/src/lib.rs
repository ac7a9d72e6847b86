//! Data shared between the invoice backend and the annotation engine
//!
//! These types describe what the extraction collaborator hands over for a
//! document (pages, fields and their bounding polygons) and the business-side
//! line items that may need to be highlighted on it.

pub mod error;
pub mod geometry;
pub mod types;

pub use error::TypesError;
pub use geometry::{Point, Rect};
pub use types::{
    line_items_from_json, BoundingRegion, ExtractedField, ExtractionResult, FieldKind,
    LengthUnit, LineItemRecord, Page, MIN_POLYGON_POINTS,
};
