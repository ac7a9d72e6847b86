//! Collision-free placement of auxiliary boxes
//!
//! A page's existing content (text blocks, images, reserved key-field regions)
//! is reduced to a list of [`OccupiedRegion`]s. [`find_clear_rect`] then tries a
//! fixed sequence of anchors and, failing those, every position that can hold a
//! box without covering that content. Only when no such position exists does a
//! small overlap become acceptable. It always returns a rectangle: when nothing
//! qualifies, the last anchor is used and the placement is flagged as degraded.
//!
//! ```text
//! ┌──────────────────────────┐
//! │ TopLeft(4)    TopRight(3)│
//! │                          │
//! │               MidRight(5)│
//! │                          │
//! │ BottomLeft(2) BottomRt(1)│
//! └──────────────────────────┘
//! ```

use invoice_types::{Page, Rect};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnnotationConfig;

/// Space already used by original page content. Always inside the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OccupiedRegion {
    rect: Rect,
}

impl OccupiedRegion {
    /// Clip `rect` to the page. `None` when nothing of it lies on the page.
    pub fn clipped(rect: Rect, page: &Page) -> Option<Self> {
        rect.clip_to(&page.bounds()).map(|rect| Self { rect })
    }

    pub fn rect(&self) -> &Rect {
        &self.rect
    }
}

/// Build the occupied set for a page from any number of rectangle sources.
pub fn occupied_regions<I>(page: &Page, rects: I) -> Vec<OccupiedRegion>
where
    I: IntoIterator<Item = Rect>,
{
    rects
        .into_iter()
        .filter_map(|r| OccupiedRegion::clipped(r, page))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    MidRight,
    /// Found by the sweep over content edges
    Grid,
}

const ANCHOR_PRIORITY: [Anchor; 5] = [
    Anchor::BottomRight,
    Anchor::BottomLeft,
    Anchor::TopRight,
    Anchor::TopLeft,
    Anchor::MidRight,
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub rect: Rect,
    pub anchor: Anchor,
    /// Total area of occupied content under `rect`
    pub overlap_area: f64,
    /// No candidate met the overlap threshold; `rect` is a fallback
    pub degraded: bool,
}

/// Sum of intersection areas between `rect` and every occupied region.
pub fn overlap_area(rect: &Rect, occupied: &[OccupiedRegion]) -> f64 {
    occupied
        .iter()
        .map(|o| rect.intersection_area(o.rect()))
        .sum()
}

fn page_margin(page: &Page, config: &AnnotationConfig) -> f64 {
    (page.width * config.margin_ratio)
        .min(page.width / 4.0)
        .min(page.height / 4.0)
}

/// Box size clamped to what fits inside the page margins.
fn clamp_size(page: &Page, margin: f64, desired_w: f64, desired_h: f64) -> (f64, f64) {
    let max_w = page.width - 2.0 * margin;
    let max_h = page.height - 2.0 * margin;
    let w = if desired_w > 0.0 { desired_w } else { max_w };
    let h = if desired_h > 0.0 { desired_h } else { max_h };
    (w.min(max_w), h.min(max_h))
}

fn anchor_rect(anchor: Anchor, page: &Page, margin: f64, w: f64, h: f64) -> Rect {
    let right = page.width - margin - w;
    let bottom = page.height - margin - h;
    let (x, y) = match anchor {
        Anchor::BottomRight => (right, bottom),
        Anchor::BottomLeft => (margin, bottom),
        Anchor::TopRight => (right, margin),
        Anchor::TopLeft => (margin, margin),
        Anchor::MidRight | Anchor::Grid => (right, (page.height - h) / 2.0),
    };
    Rect::from_origin_size(x, y, w, h)
}

/// Box origins along one axis worth testing, last first.
///
/// A clear box can always slide towards `lo` until it touches either `lo` or
/// the far edge of some region, so `lo` plus the far edges cover every clear
/// position. The near edges and `hi` are added to keep anchor-like positions
/// in front.
fn edge_positions<F>(
    lo: f64,
    hi: f64,
    size: f64,
    occupied: &[OccupiedRegion],
    edges: F,
) -> Vec<f64>
where
    F: Fn(&Rect) -> (f64, f64),
{
    let mut out = vec![lo, hi];
    for o in occupied {
        let (near, far) = edges(o.rect());
        out.push(far.clamp(lo, hi));
        out.push((near - size).clamp(lo, hi));
    }
    out.sort_by(|a, b| b.total_cmp(a));
    out.dedup();
    out
}

/// Bottom-most, then right-most, box origin that covers no occupied region.
fn sweep_clear(
    page: &Page,
    occupied: &[OccupiedRegion],
    margin: f64,
    w: f64,
    h: f64,
) -> Option<Rect> {
    let xs = edge_positions(margin, page.width - margin - w, w, occupied, |r| (r.x0, r.x1));
    let ys = edge_positions(margin, page.height - margin - h, h, occupied, |r| (r.y0, r.y1));
    for y in ys {
        let row: Vec<OccupiedRegion> = occupied
            .iter()
            .filter(|o| o.rect().y0 < y + h && o.rect().y1 > y)
            .copied()
            .collect();
        for &x in &xs {
            let rect = Rect::from_origin_size(x, y, w, h);
            if overlap_area(&rect, &row) <= 0.0 {
                return Some(rect);
            }
        }
    }
    None
}

/// Find a rectangle of (at most) `desired_w` x `desired_h` points that avoids
/// the occupied regions.
///
/// Anchors are tried in priority order for one with no overlap at all. If none
/// is clear, every position bordering occupied content is swept for an
/// overlap-free box. Only when no overlap-free box exists anywhere is the first
/// anchor whose overlap stays below `overlap_threshold_ratio` of the page area
/// accepted. As a last resort the lowest-priority anchor is returned with
/// `degraded = true`.
pub fn find_clear_rect(
    page: &Page,
    occupied: &[OccupiedRegion],
    desired_w: f64,
    desired_h: f64,
    config: &AnnotationConfig,
) -> Placement {
    let margin = page_margin(page, config);
    let (w, h) = clamp_size(page, margin, desired_w, desired_h);
    let threshold = page.area() * config.overlap_threshold_ratio;

    let candidates: Vec<Placement> = ANCHOR_PRIORITY
        .iter()
        .map(|&anchor| {
            let rect = anchor_rect(anchor, page, margin, w, h);
            Placement {
                rect,
                anchor,
                overlap_area: overlap_area(&rect, occupied),
                degraded: false,
            }
        })
        .collect();

    if let Some(clear) = candidates.iter().find(|c| c.overlap_area <= 0.0) {
        return *clear;
    }
    if let Some(rect) = sweep_clear(page, occupied, margin, w, h) {
        return Placement {
            rect,
            anchor: Anchor::Grid,
            overlap_area: 0.0,
            degraded: false,
        };
    }
    if let Some(tolerable) = candidates.iter().find(|c| c.overlap_area < threshold) {
        return *tolerable;
    }

    debug!(
        page = page.page_number,
        occupied = occupied.len(),
        "No clear position for box, using fallback anchor"
    );
    let mut fallback = candidates[candidates.len() - 1];
    fallback.degraded = true;
    fallback
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn rect_strategy(w: f64, h: f64) -> impl Strategy<Value = Rect> {
        (0.0..w, 0.0..h, 1.0..w / 2.0, 1.0..h / 2.0)
            .prop_map(|(x, y, rw, rh)| Rect::from_origin_size(x, y, rw, rh))
    }

    proptest! {
        /// Property: a placement is always returned and always lies on the page
        #[test]
        fn placement_never_fails(
            rects in prop::collection::vec(rect_strategy(612.0, 792.0), 0..40),
            bw in 10.0f64..700.0,
            bh in 10.0f64..900.0,
        ) {
            let page = Page::new(1, 612.0, 792.0);
            let config = AnnotationConfig::default();
            let occupied = occupied_regions(&page, rects);
            let placement = find_clear_rect(&page, &occupied, bw, bh, &config);
            prop_assert!(page.bounds().contains(&placement.rect));
            prop_assert!(!placement.rect.is_empty());
            for o in &occupied {
                prop_assert!(page.bounds().contains(o.rect()));
            }
        }

        /// Property: when the bottom-left anchor is free, the result has zero overlap
        #[test]
        fn free_anchor_gives_zero_overlap(
            rects in prop::collection::vec(rect_strategy(612.0, 400.0), 0..30),
            bw in 20.0f64..250.0,
            bh in 20.0f64..150.0,
        ) {
            // Content only in the upper half plus the right column; bottom-left stays free.
            let page = Page::new(1, 612.0, 792.0);
            let config = AnnotationConfig::default();
            let mut all = rects;
            all.push(Rect::new(400.0, 0.0, 612.0, 792.0));
            let occupied = occupied_regions(&page, all);
            let placement = find_clear_rect(&page, &occupied, bw, bh, &config);
            prop_assert_eq!(placement.overlap_area, 0.0);
            prop_assert!(!placement.degraded);
        }

        /// Property: any clear slot on the page means a zero-overlap result
        #[test]
        fn clear_slot_gives_zero_overlap(
            rects in prop::collection::vec(rect_strategy(612.0, 792.0), 0..40),
            fx in 0.0f64..1.0,
            fy in 0.0f64..1.0,
            bw in 20.0f64..250.0,
            bh in 20.0f64..150.0,
        ) {
            let page = Page::new(1, 612.0, 792.0);
            let config = AnnotationConfig::default();
            let margin = page_margin(&page, &config);
            let x = margin + fx * (page.width - 2.0 * margin - bw);
            let y = margin + fy * (page.height - 2.0 * margin - bh);
            let slot = Rect::from_origin_size(x, y, bw, bh);
            let occupied: Vec<OccupiedRegion> = occupied_regions(&page, rects)
                .into_iter()
                .filter(|o| o.rect().intersection_area(&slot) <= 0.0)
                .collect();
            let placement = find_clear_rect(&page, &occupied, bw, bh, &config);
            prop_assert_eq!(placement.overlap_area, 0.0);
            prop_assert_eq!(overlap_area(&placement.rect, &occupied), 0.0);
            prop_assert!(!placement.degraded);
        }

        /// Property: a fully covered page always degrades
        #[test]
        fn covered_page_degrades(bw in 50.0f64..1000.0, bh in 50.0f64..1000.0) {
            let page = Page::new(1, 612.0, 792.0);
            let config = AnnotationConfig::default();
            let occupied = occupied_regions(&page, vec![page.bounds()]);
            let placement = find_clear_rect(&page, &occupied, bw, bh, &config);
            prop_assert!(placement.degraded);
        }
    }
}
