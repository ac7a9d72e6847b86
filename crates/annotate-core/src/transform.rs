//! Orientation correction and coordinate remapping
//!
//! Extraction reports a signed skew per page. The skew is snapped to the nearest
//! right angle, the page is rotated back by the opposite amount, and every
//! polygon extracted from that page is remapped into the corrected space.
//!
//! All functions here operate in canonical space (points, top-left origin).

use invoice_types::{BoundingRegion, ExtractedField, ExtractionResult, LengthUnit, Page, Point};
use tracing::warn;

use crate::config::TieBreak;
use crate::error::AnnotateError;

const TIE_EPSILON: f64 = 1e-9;

/// Snap a detected skew to the nearest multiple of 90°.
///
/// The angle is first wrapped into `[-180, 180)`, so the result is always one
/// of `-180, -90, 0, 90, 180` and is the nearest right angle on the circle.
/// Exact odd multiples of 45° are resolved by `tie_break`. Non-finite input
/// is treated as "no skew".
pub fn normalize_angle(raw_degrees: f64, tie_break: TieBreak) -> i32 {
    if !raw_degrees.is_finite() {
        return 0;
    }
    let wrapped = (raw_degrees + 180.0).rem_euclid(360.0) - 180.0;
    let quarters = wrapped / 90.0;
    let frac = quarters - quarters.floor();

    let snapped = if (frac - 0.5).abs() < TIE_EPSILON {
        match tie_break {
            TieBreak::AwayFromZero => {
                if quarters > 0.0 {
                    quarters.ceil()
                } else {
                    quarters.floor()
                }
            }
            TieBreak::TowardZero => {
                if quarters > 0.0 {
                    quarters.floor()
                } else {
                    quarters.ceil()
                }
            }
        }
    } else {
        quarters.round()
    };

    (snapped as i32) * 90
}

/// Clockwise rotation applied to a page to undo its detected skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Correction {
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Correction {
    /// Build from any multiple of 90, wrapping into `[0, 360)`.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Correction::None),
            90 => Some(Correction::Cw90),
            180 => Some(Correction::Cw180),
            270 => Some(Correction::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Correction::None => 0,
            Correction::Cw90 => 90,
            Correction::Cw180 => 180,
            Correction::Cw270 => 270,
        }
    }

    pub fn inverse(self) -> Self {
        match self {
            Correction::None => Correction::None,
            Correction::Cw90 => Correction::Cw270,
            Correction::Cw180 => Correction::Cw180,
            Correction::Cw270 => Correction::Cw90,
        }
    }

    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Correction::Cw90 | Correction::Cw270)
    }

    pub fn is_identity(self) -> bool {
        self == Correction::None
    }
}

/// Correction that undoes a normalized detected angle: `-detected` wrapped into `[0, 360)`.
pub fn correction_for(detected: i32) -> Correction {
    // A normalized angle is always a multiple of 90, so this never falls back.
    Correction::from_degrees(-detected).unwrap_or(Correction::None)
}

/// Remap one point. `page_w`/`page_h` are the dimensions before correction.
pub fn transform_point(p: Point, correction: Correction, page_w: f64, page_h: f64) -> Point {
    match correction {
        Correction::None => p,
        Correction::Cw90 => Point::new(page_h - p.y, p.x),
        Correction::Cw180 => Point::new(page_w - p.x, page_h - p.y),
        Correction::Cw270 => Point::new(p.y, page_w - p.x),
    }
}

pub fn transform_polygon(
    polygon: &[Point],
    correction: Correction,
    page_w: f64,
    page_h: f64,
) -> Vec<Point> {
    polygon
        .iter()
        .map(|&p| transform_point(p, correction, page_w, page_h))
        .collect()
}

/// Validate and remap a single region.
///
/// Degenerate polygons are rejected with [`AnnotateError::Geometry`]; the
/// caller drops that region and carries on with the rest of the page.
pub fn transform_region(
    region: &BoundingRegion,
    correction: Correction,
    page_w: f64,
    page_h: f64,
) -> Result<BoundingRegion, AnnotateError> {
    region.validate()?;
    Ok(BoundingRegion::new(
        region.page_number,
        transform_polygon(&region.polygon, correction, page_w, page_h),
    ))
}

/// Page metadata after applying `correction`.
pub fn transform_page(page: &Page, correction: Correction) -> Page {
    let mut out = page.clone();
    if correction.swaps_dimensions() {
        std::mem::swap(&mut out.width, &mut out.height);
    }
    if !correction.is_identity() {
        out.detected_angle = 0.0;
        out.corrected = true;
    }
    out
}

/// Remap every region that belongs to `page`, nested children included.
///
/// `page` holds the pre-correction dimensions. Degenerate regions are dropped
/// and returned as errors so they can be reported as warnings.
pub fn transform_fields(
    fields: &mut [ExtractedField],
    page: &Page,
    correction: Correction,
) -> Vec<AnnotateError> {
    let mut errors = Vec::new();
    for field in fields.iter_mut() {
        field.retain_regions_mut(&mut |region| {
            if region.page_number != page.page_number {
                return true;
            }
            match transform_region(region, correction, page.width, page.height) {
                Ok(remapped) => {
                    *region = remapped;
                    true
                }
                Err(e) => {
                    warn!(page = page.page_number, error = %e, "Dropping degenerate region");
                    errors.push(e);
                    false
                }
            }
        });
    }
    errors
}

/// Convert pages and every polygon into points.
pub fn to_points(mut extraction: ExtractionResult, pixel_dpi: f64) -> ExtractionResult {
    let factor = extraction.unit.points_per_unit(pixel_dpi);
    if extraction.unit == LengthUnit::Point {
        return extraction;
    }
    for page in &mut extraction.pages {
        page.width *= factor;
        page.height *= factor;
    }
    for field in &mut extraction.fields {
        field.retain_regions_mut(&mut |region| {
            for p in &mut region.polygon {
                *p = p.scaled(factor);
            }
            true
        });
    }
    extraction.unit = LengthUnit::Point;
    extraction
}
