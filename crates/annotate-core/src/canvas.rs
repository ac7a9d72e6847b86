//! The page-mutation collaborator
//!
//! The engine never edits a document directly; it talks to a [`Canvas`]. All
//! rectangles crossing this boundary are in canonical space (points, top-left
//! origin) of the page as it currently is, i.e. after any rotation the canvas
//! has already applied.
//!
//! Mutating methods take `&mut self`: one canvas owns one open document, and
//! only one mutation sequence can be in flight for it.

use std::path::Path;

use invoice_types::Rect;
use serde::{Deserialize, Serialize};

use crate::error::AnnotateError;
use crate::operations::{BoxStyle, TextStyle};
use crate::transform::Correction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Keep existing object numbering; only changed objects differ.
    Incremental,
    /// Rewrite the whole file, dropping unreachable objects.
    #[default]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

/// An annotation as read back from the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationInfo {
    pub subtype: String,
    pub rect: Rect,
    pub tag: Option<String>,
    pub contents: Option<String>,
}

pub trait Canvas {
    fn page_count(&self) -> u32;

    fn page_size(&self, page: u32) -> Result<PageSize, AnnotateError>;

    /// Correction previously applied to `page` by [`Canvas::rotate_page`], if any.
    fn rotation_marker(&self, page: u32) -> Result<Option<Correction>, AnnotateError>;

    /// Re-render `page` rotated clockwise by `correction` and record the marker.
    ///
    /// `render_scale` is the pixel-scale multiplier for canvases that rasterize
    /// the page; vector canvases may ignore it. Returns the new page size.
    fn rotate_page(
        &mut self,
        page: u32,
        correction: Correction,
        render_scale: f64,
    ) -> Result<PageSize, AnnotateError>;

    fn text_blocks(&self, page: u32) -> Result<Vec<Rect>, AnnotateError>;

    fn image_blocks(&self, page: u32) -> Result<Vec<Rect>, AnnotateError>;

    fn add_rectangle_annotation(
        &mut self,
        page: u32,
        rect: &Rect,
        style: &BoxStyle,
        tag: &str,
    ) -> Result<(), AnnotateError>;

    fn add_text_annotation(
        &mut self,
        page: u32,
        rect: &Rect,
        text: &str,
        style: &TextStyle,
        tag: &str,
    ) -> Result<(), AnnotateError>;

    /// Remove every annotation on `page` carrying `tag`; returns how many went.
    fn remove_annotations_by_tag(&mut self, page: u32, tag: &str) -> Result<usize, AnnotateError>;

    fn annotations(&self, page: u32) -> Result<Vec<AnnotationInfo>, AnnotateError>;

    fn annotations_by_tag(
        &self,
        page: u32,
        tag: &str,
    ) -> Result<Vec<AnnotationInfo>, AnnotateError> {
        Ok(self
            .annotations(page)?
            .into_iter()
            .filter(|a| a.tag.as_deref() == Some(tag))
            .collect())
    }

    /// Persist the document. On error the file at `destination` is unchanged.
    fn save(&mut self, destination: &Path, mode: SaveMode) -> Result<(), AnnotateError>;
}
