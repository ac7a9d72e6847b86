//! Page rotation and annotation placement for scanned invoices
//!
//! This crate corrects page orientation, remaps extracted geometry into the
//! corrected space, matches business line items to extracted regions, and
//! places highlights, a summary label and a notes box without covering page
//! content.
//!
//! The work is split in two phases:
//! - `plan::plan_document`: pure computation of the desired annotation set
//! - `apply_operations::apply_page`: clear-then-add against a [`Canvas`]
//!
//! [`Pipeline`] runs both over a whole document; [`LopdfCanvas`] is the
//! canvas for PDF files.

pub mod apply_operations;
pub mod canvas;
pub mod config;
pub mod content_scan;
pub mod error;
pub mod matcher;
pub mod operations;
pub mod pdf_canvas;
pub mod pipeline;
pub mod placement;
pub mod plan;
pub mod text_fit;
pub mod transform;

pub use apply_operations::{apply_page, PageApplied};
pub use canvas::{AnnotationInfo, Canvas, PageSize, SaveMode};
pub use config::{AnnotationConfig, FontBounds, TieBreak};
pub use error::AnnotateError;
pub use matcher::{match_records, MatchResult, MatchTier};
pub use operations::{AnnotationKind, AnnotationPlan, AnnotationRequest, BoxStyle, TextStyle};
pub use pdf_canvas::LopdfCanvas;
pub use pipeline::{CancellationFlag, PageFailure, PageState, Pipeline, ProcessReport};
pub use placement::{find_clear_rect, OccupiedRegion, Placement};
pub use plan::{plan_document, PlanOutcome};
pub use text_fit::{fit_text, FitResult};
pub use transform::{correction_for, normalize_angle, transform_page, transform_polygon, Correction};
