//! Desired annotation set, computed without a canvas
//!
//! Everything here is a pure function of page metadata, transformed fields,
//! match results and the occupied regions the caller collected. Applying the
//! result is the job of [`crate::apply_operations`].

use invoice_types::{ExtractedField, FieldKind, Page, Rect};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnnotationConfig;
use crate::matcher::MatchResult;
use crate::operations::{AnnotationKind, AnnotationPlan, AnnotationRequest, BoxStyle, TextStyle};
use crate::placement::{find_clear_rect, occupied_regions, OccupiedRegion, Placement};
use crate::text_fit::{fit_text, FitResult, TextMetrics, TEXT_PADDING};

/// Space added around a matched region before highlighting it.
pub const HIGHLIGHT_PADDING: f64 = 2.0;

pub const LABEL_FONT_SIZE: f64 = 10.0;

/// Vertical gap between the summary label and the highlight it sits on.
const LABEL_GAP: f64 = 2.0;

/// Page that carries the notes box.
pub const NOTES_PAGE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotesOutcome {
    pub placement: Placement,
    pub fit: FitResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanOutcome {
    pub plan: AnnotationPlan,
    pub notes: Option<NotesOutcome>,
}

pub fn highlight_style(config: &AnnotationConfig) -> BoxStyle {
    BoxStyle {
        stroke: None,
        fill: Some(config.highlight_color.clone()),
        opacity: config.highlight_opacity,
        border_width: 0.0,
    }
}

fn notes_box_style(config: &AnnotationConfig) -> BoxStyle {
    BoxStyle {
        stroke: Some(config.header_color.clone()),
        fill: Some(config.notes_box_color.clone()),
        opacity: 1.0,
        border_width: 1.0,
    }
}

fn label_style(config: &AnnotationConfig) -> TextStyle {
    TextStyle {
        font_size: LABEL_FONT_SIZE,
        color: config.header_color.clone(),
        is_bold: true,
        ..TextStyle::default()
    }
}

/// Rectangles of key fields on `page_number`; the notes box must not hide them.
pub fn reserved_regions(fields: &[ExtractedField], page_number: u32) -> Vec<Rect> {
    fields
        .iter()
        .filter(|f| f.kind == FieldKind::KeyField)
        .flat_map(|f| f.all_regions())
        .filter(|r| r.page_number == page_number)
        .filter_map(|r| r.bounding_rect())
        .collect()
}

/// One highlight per region of every matched field, padded and clipped to
/// its page. Identical rectangles are emitted once.
pub fn plan_highlights(
    pages: &[Page],
    fields: &[ExtractedField],
    matches: &[MatchResult],
    config: &AnnotationConfig,
) -> Vec<AnnotationRequest> {
    let mut out: Vec<AnnotationRequest> = Vec::new();

    for result in matches {
        let Some(field) = result.field_index.and_then(|i| fields.get(i)) else {
            continue;
        };
        for region in field.highlight_regions() {
            let Some(page) = pages.iter().find(|p| p.page_number == region.page_number) else {
                debug!(page = region.page_number, "Region on unknown page");
                continue;
            };
            let Some(rect) = region
                .bounding_rect()
                .map(|r| r.inflate(HIGHLIGHT_PADDING))
                .and_then(|r| r.clip_to(&page.bounds()))
            else {
                continue;
            };
            let duplicate = out
                .iter()
                .any(|r| r.page() == page.page_number && *r.rect() == rect);
            if duplicate {
                continue;
            }
            out.push(AnnotationRequest::Highlight {
                page: page.page_number,
                rect,
                style: highlight_style(config),
                record_id: result.record_id.clone(),
            });
        }
    }

    out
}

/// `"{header_label}: {count}"` directly above `anchor`, or below it when the
/// page has no room above.
pub fn plan_label(
    anchor: &Rect,
    page: &Page,
    count: usize,
    config: &AnnotationConfig,
) -> Option<AnnotationRequest> {
    let text = format!("{}: {}", config.header_label, count);
    let width = text.chars().count() as f64 * LABEL_FONT_SIZE * config.char_width_ratio
        + 2.0 * TEXT_PADDING;
    let height = LABEL_FONT_SIZE * config.line_height_ratio + 2.0 * TEXT_PADDING;

    let x = anchor.x0.min(page.width - width).max(0.0);
    let above = anchor.y0 - LABEL_GAP - height;
    let y = if above >= 0.0 {
        above
    } else {
        anchor.y1 + LABEL_GAP
    };

    let rect = Rect::from_origin_size(x, y, width, height).clip_to(&page.bounds())?;
    Some(AnnotationRequest::Label {
        page: page.page_number,
        rect,
        text,
        style: label_style(config),
    })
}

/// Notes box size before clamping to the page: ratios of the page with
/// absolute floors.
pub fn notes_box_size(page: &Page, config: &AnnotationConfig) -> (f64, f64) {
    (
        (page.width * config.box_width_ratio).max(config.min_width),
        (page.height * config.box_height_ratio).max(config.min_height),
    )
}

/// Place and fill the notes box. `None` for blank notes.
pub fn plan_notes(
    page: &Page,
    text: &str,
    occupied: &[OccupiedRegion],
    config: &AnnotationConfig,
) -> Option<(AnnotationRequest, NotesOutcome)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (w, h) = notes_box_size(page, config);
    let placement = find_clear_rect(page, occupied, w, h, config);
    if placement.degraded {
        warn!(
            page = page.page_number,
            overlap = placement.overlap_area,
            "Notes box overlaps page content"
        );
    }

    let metrics = TextMetrics::from_config(config);
    let fit = fit_text(
        text,
        &placement.rect,
        config.font_bounds,
        config.max_lines,
        &metrics,
    );
    if fit.truncated {
        warn!(font_size = fit.font_size, "Notes text truncated");
    }

    let request = AnnotationRequest::NotesBox {
        page: page.page_number,
        rect: placement.rect,
        box_style: notes_box_style(config),
        lines: fit.lines.clone(),
        text_style: TextStyle {
            font_size: fit.font_size,
            color: config.notes_text_color.clone(),
            ..TextStyle::default()
        },
        degraded: placement.degraded,
        truncated: fit.truncated,
    };
    Some((request, NotesOutcome { placement, fit }))
}

/// Build the whole plan for a document.
///
/// `notes_occupied` holds the content already on the notes page (text,
/// images, key fields); highlights and the label planned for that page are
/// added to it before the notes box is placed.
pub fn plan_document(
    pages: &[Page],
    fields: &[ExtractedField],
    matches: &[MatchResult],
    notes: Option<&str>,
    notes_occupied: &[Rect],
    config: &AnnotationConfig,
) -> PlanOutcome {
    let mut plan = AnnotationPlan::new();

    let highlights = plan_highlights(pages, fields, matches, config);
    let label = highlights.first().and_then(|first| {
        let page = pages.iter().find(|p| p.page_number == first.page())?;
        plan_label(first.rect(), page, highlights.len(), config)
    });
    plan.extend(highlights);
    plan.extend(label);

    let mut outcome = None;
    if let (Some(text), Some(page)) = (notes, pages.iter().find(|p| p.page_number == NOTES_PAGE))
    {
        let planned = plan
            .requests_for_page(page.page_number)
            .into_iter()
            .map(|r| *r.rect())
            .collect::<Vec<_>>();
        let occupied = occupied_regions(page, notes_occupied.iter().copied().chain(planned));
        if let Some((request, notes)) = plan_notes(page, text, &occupied, config) {
            plan.add(request);
            outcome = Some(notes);
        }
    }

    debug!(
        highlights = plan.count(AnnotationKind::Highlight),
        labels = plan.count(AnnotationKind::Label),
        notes = plan.count(AnnotationKind::NotesBox),
        "Planned annotations"
    );
    PlanOutcome {
        plan,
        notes: outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchTier;
    use invoice_types::BoundingRegion;
    use pretty_assertions::assert_eq;

    fn page(n: u32) -> Page {
        Page::new(n, 612.0, 792.0)
    }

    fn line_item(page: u32, rect: Rect) -> ExtractedField {
        ExtractedField::new("Items", FieldKind::LineItem, "Flour")
            .with_region(BoundingRegion::from_rect(page, rect))
    }

    fn matched(id: &str, index: usize) -> MatchResult {
        MatchResult {
            record_id: id.to_string(),
            field_index: Some(index),
            tier: MatchTier::ExactDescription,
            confidence: 100.0,
        }
    }

    fn unmatched(id: &str) -> MatchResult {
        MatchResult {
            record_id: id.to_string(),
            field_index: None,
            tier: MatchTier::Unmatched,
            confidence: 0.0,
        }
    }

    #[test]
    fn test_highlight_is_padded_and_clipped() {
        let fields = vec![line_item(1, Rect::new(0.0, 300.0, 200.0, 315.0))];
        let requests = plan_highlights(&[page(1)], &fields, &[matched("a", 0)], &Default::default());
        assert_eq!(requests.len(), 1);
        assert_eq!(*requests[0].rect(), Rect::new(0.0, 298.0, 202.0, 317.0));
    }

    #[test]
    fn test_unmatched_and_unknown_pages_are_skipped() {
        let fields = vec![
            line_item(1, Rect::new(50.0, 300.0, 200.0, 315.0)),
            line_item(7, Rect::new(50.0, 300.0, 200.0, 315.0)),
        ];
        let matches = vec![matched("a", 1), unmatched("b")];
        let requests = plan_highlights(&[page(1)], &fields, &matches, &Default::default());
        assert!(requests.is_empty());
    }

    #[test]
    fn test_same_field_matched_twice_highlights_once() {
        let fields = vec![line_item(1, Rect::new(50.0, 300.0, 200.0, 315.0))];
        let matches = vec![matched("a", 0), matched("b", 0)];
        let requests = plan_highlights(&[page(1)], &fields, &matches, &Default::default());
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn test_label_above_then_below() {
        let config = AnnotationConfig::default();
        let above = plan_label(&Rect::new(50.0, 300.0, 200.0, 315.0), &page(1), 2, &config).unwrap();
        match &above {
            AnnotationRequest::Label { rect, text, .. } => {
                assert_eq!(text, "Flagged items: 2");
                assert!(rect.y1 <= 300.0);
            }
            other => panic!("expected label, got {:?}", other),
        }

        let below = plan_label(&Rect::new(50.0, 5.0, 200.0, 20.0), &page(1), 1, &config).unwrap();
        assert!(below.rect().y0 >= 20.0);
    }

    #[test]
    fn test_label_stays_on_page_near_right_edge() {
        let config = AnnotationConfig::default();
        let label = plan_label(&Rect::new(590.0, 300.0, 612.0, 315.0), &page(1), 3, &config).unwrap();
        assert!(label.rect().x1 <= 612.0);
        assert!(label.rect().x0 >= 0.0);
    }

    #[test]
    fn test_blank_notes_produce_no_box() {
        let config = AnnotationConfig::default();
        assert!(plan_notes(&page(1), "   \n ", &[], &config).is_none());
    }

    #[test]
    fn test_notes_box_size_floors() {
        let config = AnnotationConfig::default();
        let small = Page::new(1, 200.0, 200.0);
        assert_eq!(notes_box_size(&small, &config), (180.0, 72.0));
        let (w, h) = notes_box_size(&page(1), &config);
        assert!((w - 612.0 * 0.38).abs() < 1e-9);
        assert!((h - 792.0 * 0.16).abs() < 1e-9);
    }

    #[test]
    fn test_plan_document_notes_avoid_highlights() {
        let config = AnnotationConfig::default();
        // A line item spanning the whole bottom band pushes the notes box elsewhere.
        let fields = vec![line_item(1, Rect::new(0.0, 600.0, 612.0, 792.0))];
        let outcome = plan_document(
            &[page(1)],
            &fields,
            &[matched("a", 0)],
            Some("Check the delivery note"),
            &[],
            &config,
        );

        assert_eq!(outcome.plan.count(AnnotationKind::Highlight), 1);
        assert_eq!(outcome.plan.count(AnnotationKind::Label), 1);
        assert_eq!(outcome.plan.count(AnnotationKind::NotesBox), 1);
        let notes = outcome.notes.unwrap();
        assert!(!notes.placement.degraded);
        let highlight = outcome.plan.requests()[0].rect();
        assert_eq!(notes.placement.rect.intersection_area(highlight), 0.0);
    }

    #[test]
    fn test_plan_document_without_matches_or_notes_is_empty() {
        let outcome = plan_document(
            &[page(1)],
            &[],
            &[unmatched("a")],
            None,
            &[],
            &AnnotationConfig::default(),
        );
        assert!(outcome.plan.is_empty());
        assert!(outcome.notes.is_none());
    }

    #[test]
    fn test_reserved_regions_only_key_fields_on_page() {
        let fields = vec![
            ExtractedField::new("InvoiceTotal", FieldKind::KeyField, "120.00")
                .with_region(BoundingRegion::from_rect(1, Rect::new(400.0, 700.0, 500.0, 720.0))),
            ExtractedField::new("VendorName", FieldKind::KeyField, "Acme")
                .with_region(BoundingRegion::from_rect(2, Rect::new(10.0, 10.0, 90.0, 30.0))),
            line_item(1, Rect::new(50.0, 300.0, 200.0, 315.0)),
        ];
        assert_eq!(
            reserved_regions(&fields, 1),
            vec![Rect::new(400.0, 700.0, 500.0, 720.0)]
        );
    }
}
