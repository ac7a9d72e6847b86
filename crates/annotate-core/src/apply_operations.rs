//! Apply an annotation plan to a canvas

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canvas::Canvas;
use crate::error::AnnotateError;
use crate::operations::{AnnotationPlan, AnnotationRequest};

/// What one page's clear-then-add pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageApplied {
    /// Engine annotations from an earlier run that were replaced
    pub removed: usize,
    pub highlights: usize,
    pub labels: usize,
    pub notes: bool,
}

/// Replace every annotation tagged `tag` on `page` with the plan's requests
/// for that page.
///
/// When an add fails the page is cleared of `tag` annotations again before
/// the error is returned, so a page never mixes stale and fresh annotations.
pub fn apply_page<C: Canvas + ?Sized>(
    canvas: &mut C,
    page: u32,
    plan: &AnnotationPlan,
    tag: &str,
) -> Result<PageApplied, AnnotateError> {
    let removed = canvas.remove_annotations_by_tag(page, tag)?;
    let mut applied = PageApplied {
        removed,
        ..PageApplied::default()
    };

    for request in plan.requests_for_page(page) {
        if let Err(e) = apply_request(canvas, request, tag, &mut applied) {
            warn!(page, error = %e, "Annotation failed, rolling back page");
            if let Err(cleanup) = canvas.remove_annotations_by_tag(page, tag) {
                warn!(page, error = %cleanup, "Rollback failed");
            }
            return Err(e);
        }
    }

    debug!(
        page,
        removed = applied.removed,
        highlights = applied.highlights,
        notes = applied.notes,
        "Applied page annotations"
    );
    Ok(applied)
}

fn apply_request<C: Canvas + ?Sized>(
    canvas: &mut C,
    request: &AnnotationRequest,
    tag: &str,
    applied: &mut PageApplied,
) -> Result<(), AnnotateError> {
    match request {
        AnnotationRequest::Highlight {
            page, rect, style, ..
        } => {
            canvas.add_rectangle_annotation(*page, rect, style, tag)?;
            applied.highlights += 1;
        }
        AnnotationRequest::Label {
            page,
            rect,
            text,
            style,
        } => {
            canvas.add_text_annotation(*page, rect, text, style, tag)?;
            applied.labels += 1;
        }
        AnnotationRequest::NotesBox {
            page,
            rect,
            box_style,
            lines,
            text_style,
            ..
        } => {
            canvas.add_rectangle_annotation(*page, rect, box_style, tag)?;
            canvas.add_text_annotation(*page, rect, &lines.join("\n"), text_style, tag)?;
            applied.notes = true;
        }
    }
    Ok(())
}
