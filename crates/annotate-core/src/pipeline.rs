//! One document, start to finish
//!
//! Pages are walked in order. For each page the detected skew is snapped, the
//! page is rotated on the canvas (at most once per physical file) and every
//! region extracted from it is remapped. Matching and planning then run over
//! the corrected geometry, and the plan is applied page by page with a
//! clear-then-add pass.
//!
//! Only a failed save is fatal. Everything else lands in the [`ProcessReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use invoice_types::{ExtractedField, ExtractionResult, LineItemRecord, Page};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::apply_operations::apply_page;
use crate::canvas::{Canvas, SaveMode};
use crate::config::AnnotationConfig;
use crate::error::AnnotateError;
use crate::matcher::match_records;
use crate::pdf_canvas::LopdfCanvas;
use crate::plan::{plan_document, reserved_regions, NOTES_PAGE};
use crate::transform::{
    correction_for, normalize_angle, to_points, transform_fields, transform_page, Correction,
};

/// Cooperative cancellation, polled between pages.
#[derive(Debug, Default)]
pub struct CancellationFlag(AtomicBool);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-page progress.
///
/// `Untouched -> AngleComputed -> {NotRotated | Rotated} -> AnnotationsApplied`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Untouched,
    AngleComputed,
    NotRotated,
    Rotated,
    AnnotationsApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_number: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub pages_rotated: usize,
    pub highlights_applied: usize,
    pub notes_applied: bool,
    pub degraded_placement: bool,
    /// Font size the notes text was set in
    pub notes_font_size: Option<f64>,
    pub notes_truncated: bool,
    pub warnings: Vec<String>,
    pub per_page_failures: Vec<PageFailure>,
    pub page_states: BTreeMap<u32, PageState>,
    pub cancelled: bool,
}

impl ProcessReport {
    fn warn(&mut self, err: &AnnotateError) {
        self.warnings.push(err.to_string());
    }

    fn fail(&mut self, page_number: u32, reason: String) {
        self.per_page_failures.push(PageFailure {
            page_number,
            reason,
        });
    }

    fn set_state(&mut self, page_number: u32, state: PageState) {
        debug!(page = page_number, ?state, "Page state");
        self.page_states.insert(page_number, state);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: AnnotationConfig,
}

impl Pipeline {
    pub fn new(config: AnnotationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnnotationConfig {
        &self.config
    }

    /// Load `input`, annotate it and save to `output`.
    ///
    /// # Errors
    ///
    /// [`AnnotateError::ParseError`] when the PDF cannot be loaded and
    /// [`AnnotateError::Save`] when it cannot be written. In both cases
    /// `output` is left as it was.
    #[allow(clippy::too_many_arguments)]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        mode: SaveMode,
        extraction: &ExtractionResult,
        records: &[LineItemRecord],
        notes: Option<&str>,
        cancel: &CancellationFlag,
    ) -> Result<ProcessReport, AnnotateError> {
        let mut canvas = LopdfCanvas::load(input)?;
        self.run_and_save(&mut canvas, extraction, records, notes, cancel, output, mode)
    }

    /// [`Pipeline::run`], then save. A cancelled run is still saved: pages
    /// handled before cancellation stay corrected.
    #[allow(clippy::too_many_arguments)]
    pub fn run_and_save<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        extraction: &ExtractionResult,
        records: &[LineItemRecord],
        notes: Option<&str>,
        cancel: &CancellationFlag,
        destination: &Path,
        mode: SaveMode,
    ) -> Result<ProcessReport, AnnotateError> {
        let report = self.run(canvas, extraction, records, notes, cancel);
        canvas.save(destination, mode)?;
        Ok(report)
    }

    #[instrument(skip_all, fields(pages = extraction.pages.len(), records = records.len()))]
    pub fn run<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        extraction: &ExtractionResult,
        records: &[LineItemRecord],
        notes: Option<&str>,
        cancel: &CancellationFlag,
    ) -> ProcessReport {
        let config = &self.config;
        let mut report = ProcessReport::default();

        let extraction = to_points(extraction.clone(), config.pixel_dpi);
        let mut fields = extraction.fields;
        let mut pages = extraction.pages;
        pages.sort_by_key(|p| p.page_number);

        let page_count = canvas.page_count();
        let mut corrected: Vec<Page> = Vec::with_capacity(pages.len());
        let mut seen = BTreeSet::new();

        for page in &pages {
            if cancel.is_cancelled() {
                info!(page = page.page_number, "Cancelled before page");
                report.cancelled = true;
                return report;
            }
            if !seen.insert(page.page_number) {
                let reason = format!("page {} listed more than once", page.page_number);
                warn!(page = page.page_number, "{}", reason);
                report.fail(page.page_number, reason);
                continue;
            }
            report.set_state(page.page_number, PageState::Untouched);
            if page.page_number == 0 || page.page_number > page_count {
                let reason = format!(
                    "page {} is not in the document ({} pages)",
                    page.page_number, page_count
                );
                warn!(page = page.page_number, "{}", reason);
                report.fail(page.page_number, reason);
                continue;
            }
            corrected.push(self.orient_page(canvas, page, &mut fields, &mut report));
        }

        let wanted: Vec<LineItemRecord> = records
            .iter()
            .filter(|r| r.should_highlight)
            .cloned()
            .collect();
        let matches = match_records(&wanted, &fields, config.fuzzy_threshold);
        for (record, result) in wanted.iter().zip(&matches) {
            if result.is_match() {
                debug!(
                    record = %record.id,
                    tier = ?result.tier,
                    confidence = result.confidence,
                    "Matched"
                );
            } else {
                let err = AnnotateError::MatchNotFound(format!(
                    "{} \"{}\"",
                    record.id, record.description
                ));
                warn!(record = %record.id, "{}", err);
                report.warn(&err);
            }
        }

        let notes = notes.map(str::trim).filter(|t| !t.is_empty());
        let notes_occupied = match notes {
            Some(_) => self.notes_occupied(canvas, &corrected, &fields, &mut report),
            None => Vec::new(),
        };

        let outcome = plan_document(&corrected, &fields, &matches, notes, &notes_occupied, config);
        if let Some(n) = &outcome.notes {
            report.degraded_placement = n.placement.degraded;
            report.notes_font_size = Some(n.fit.font_size);
            report.notes_truncated = n.fit.truncated;
            if n.placement.degraded {
                report.warn(&AnnotateError::PlacementNotFound(NOTES_PAGE));
            }
        }

        for page in &corrected {
            if cancel.is_cancelled() {
                info!(page = page.page_number, "Cancelled before applying page");
                report.cancelled = true;
                break;
            }
            match apply_page(canvas, page.page_number, &outcome.plan, &config.tag) {
                Ok(applied) => {
                    report.highlights_applied += applied.highlights;
                    report.notes_applied |= applied.notes;
                    report.set_state(page.page_number, PageState::AnnotationsApplied);
                }
                Err(e) => {
                    warn!(page = page.page_number, error = %e, "Page annotations not applied");
                    report.fail(page.page_number, e.to_string());
                }
            }
        }

        info!(
            pages_rotated = report.pages_rotated,
            highlights = report.highlights_applied,
            notes = report.notes_applied,
            warnings = report.warnings.len(),
            failures = report.per_page_failures.len(),
            "Document processed"
        );
        report
    }

    /// Snap the skew, rotate the canvas page if needed and remap the page's
    /// regions. Returns the page as it now is.
    ///
    /// Pages already marked `corrected` are taken as they are: their regions
    /// match the corrected canvas and the canvas is never rotated for them.
    #[instrument(skip_all, fields(page = page.page_number))]
    fn orient_page<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        page: &Page,
        fields: &mut [ExtractedField],
        report: &mut ProcessReport,
    ) -> Page {
        let n = page.page_number;
        if page.corrected {
            // Geometry is already in the corrected space of the canvas page.
            report.set_state(n, PageState::AngleComputed);
            let state = match canvas.rotation_marker(n) {
                Ok(Some(_)) => PageState::Rotated,
                _ => PageState::NotRotated,
            };
            debug!(?state, "Extraction already corrected");
            report.set_state(n, state);
            return transform_page(page, Correction::None);
        }

        let detected = normalize_angle(page.detected_angle, self.config.tie_break);
        let wanted = correction_for(detected);
        report.set_state(n, PageState::AngleComputed);

        let applied = match canvas.rotation_marker(n) {
            Ok(Some(done)) => {
                info!(degrees = done.degrees(), "Page already rotated");
                report.set_state(n, PageState::Rotated);
                done
            }
            Ok(None) if wanted.is_identity() => {
                report.set_state(n, PageState::NotRotated);
                Correction::None
            }
            Ok(None) => match canvas.rotate_page(n, wanted, self.config.render_scale) {
                Ok(size) => {
                    debug!(width = size.width, height = size.height, "Rotated");
                    report.pages_rotated += 1;
                    report.set_state(n, PageState::Rotated);
                    wanted
                }
                Err(e) => {
                    warn!(error = %e, "Rotation failed, page left as is");
                    report.fail(n, e.to_string());
                    report.set_state(n, PageState::NotRotated);
                    Correction::None
                }
            },
            Err(e) => {
                warn!(error = %e, "Cannot read rotation marker");
                report.fail(n, e.to_string());
                report.set_state(n, PageState::NotRotated);
                Correction::None
            }
        };

        for err in transform_fields(fields, page, applied) {
            report.warn(&err);
        }
        transform_page(page, applied)
    }

    /// Content the notes box must avoid on the notes page.
    fn notes_occupied<C: Canvas + ?Sized>(
        &self,
        canvas: &C,
        pages: &[Page],
        fields: &[ExtractedField],
        report: &mut ProcessReport,
    ) -> Vec<invoice_types::Rect> {
        if !pages.iter().any(|p| p.page_number == NOTES_PAGE) {
            let err = AnnotateError::PlacementNotFound(NOTES_PAGE);
            warn!("{}", err);
            report.warn(&err);
            return Vec::new();
        }

        let mut occupied = Vec::new();
        match canvas.text_blocks(NOTES_PAGE) {
            Ok(blocks) => occupied.extend(blocks),
            Err(e) => {
                warn!(error = %e, "Text blocks unavailable");
                report.warn(&e);
            }
        }
        match canvas.image_blocks(NOTES_PAGE) {
            Ok(blocks) => occupied.extend(blocks),
            Err(e) => {
                warn!(error = %e, "Image blocks unavailable");
                report.warn(&e);
            }
        }
        occupied.extend(reserved_regions(fields, NOTES_PAGE));
        occupied
    }
}
