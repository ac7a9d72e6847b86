use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::geometry::{Point, Rect};

/// Minimum number of vertices a bounding polygon must carry.
pub const MIN_POLYGON_POINTS: usize = 4;

/// Polygons with an absolute area below this are treated as degenerate.
const DEGENERATE_AREA: f64 = 1e-9;

/// Unit the extraction collaborator measured its geometry in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Inch,
    Point,
    Pixel,
}

impl LengthUnit {
    /// Multiplier converting this unit to PDF points.
    ///
    /// `pixel_dpi` is only consulted for [`LengthUnit::Pixel`].
    pub fn points_per_unit(self, pixel_dpi: f64) -> f64 {
        match self {
            LengthUnit::Inch => 72.0,
            LengthUnit::Point => 1.0,
            LengthUnit::Pixel => 72.0 / pixel_dpi,
        }
    }
}

/// A page as reported by the extraction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page index.
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    /// Signed skew detected by extraction, in degrees.
    #[serde(default)]
    pub detected_angle: f64,
    /// Set once orientation has been corrected; `detected_angle` is 0 from then on.
    #[serde(default)]
    pub corrected: bool,
}

impl Page {
    pub fn new(page_number: u32, width: f64, height: f64) -> Self {
        Self {
            page_number,
            width,
            height,
            detected_angle: 0.0,
            corrected: false,
        }
    }

    pub fn with_angle(mut self, detected_angle: f64) -> Self {
        self.detected_angle = detected_angle;
        self
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.page_number == 0 {
            return Err(TypesError::InvalidPage(
                "Page numbers must be >= 1".to_string(),
            ));
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(TypesError::InvalidPage(format!(
                "Page {} has non-positive size {}x{}",
                self.page_number, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Where a piece of extracted content sits on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub page_number: u32,
    pub polygon: Vec<Point>,
}

impl BoundingRegion {
    pub fn new(page_number: u32, polygon: Vec<Point>) -> Self {
        Self {
            page_number,
            polygon,
        }
    }

    /// Axis-aligned rectangle from a top-left corner and size, as a 4-point polygon.
    pub fn from_rect(page_number: u32, rect: Rect) -> Self {
        Self::new(
            page_number,
            vec![
                Point::new(rect.x0, rect.y0),
                Point::new(rect.x1, rect.y0),
                Point::new(rect.x1, rect.y1),
                Point::new(rect.x0, rect.y1),
            ],
        )
    }

    /// Shoelace area of the polygon (absolute value).
    pub fn area(&self) -> f64 {
        let n = self.polygon.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.polygon[i];
                let b = self.polygon[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        (twice / 2.0).abs()
    }

    pub fn bounding_rect(&self) -> Option<Rect> {
        Rect::bounding(&self.polygon)
    }

    /// Reject polygons that cannot describe a region: too few points,
    /// non-finite coordinates, or zero area (duplicate or collinear points).
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.polygon.len() < MIN_POLYGON_POINTS {
            return Err(TypesError::DegeneratePolygon {
                page: self.page_number,
                reason: format!(
                    "polygon has {} points, need at least {}",
                    self.polygon.len(),
                    MIN_POLYGON_POINTS
                ),
            });
        }
        if self
            .polygon
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(TypesError::DegeneratePolygon {
                page: self.page_number,
                reason: "polygon has non-finite coordinates".to_string(),
            });
        }
        if self.area() < DEGENERATE_AREA {
            return Err(TypesError::DegeneratePolygon {
                page: self.page_number,
                reason: "polygon has zero area".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Header-level values (supplier, invoice number, totals). Their regions are
    /// reserved so auxiliary boxes never cover them.
    KeyField,
    /// One row of the invoice item table.
    LineItem,
}

/// A structured value produced by the extraction step.
///
/// Line items usually nest their columns (`Description`, `ProductCode`, ...)
/// as children, each with its own regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub bounding_regions: Vec<BoundingRegion>,
    #[serde(default)]
    pub children: Vec<ExtractedField>,
}

impl ExtractedField {
    pub fn new(name: impl Into<String>, kind: FieldKind, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.into(),
            bounding_regions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_region(mut self, region: BoundingRegion) -> Self {
        self.bounding_regions.push(region);
        self
    }

    pub fn with_child(mut self, child: ExtractedField) -> Self {
        self.children.push(child);
        self
    }

    /// Child field by name, compared case-insensitively.
    pub fn child(&self, name: &str) -> Option<&ExtractedField> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Description column, falling back to the field's own value.
    pub fn description(&self) -> &str {
        self.child("Description")
            .map(|c| c.value.as_str())
            .unwrap_or(self.value.as_str())
    }

    pub fn product_code(&self) -> Option<&str> {
        self.child("ProductCode")
            .map(|c| c.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Regions to mark for this field: its own, or the union of its
    /// children's when extraction only located the columns.
    pub fn highlight_regions(&self) -> Vec<&BoundingRegion> {
        if !self.bounding_regions.is_empty() {
            return self.bounding_regions.iter().collect();
        }
        self.children
            .iter()
            .flat_map(|c| c.highlight_regions())
            .collect()
    }

    /// Every region of this field and all nested children.
    pub fn all_regions(&self) -> Vec<&BoundingRegion> {
        let mut out: Vec<&BoundingRegion> = self.bounding_regions.iter().collect();
        for child in &self.children {
            out.extend(child.all_regions());
        }
        out
    }

    /// Visit every region, nested ones included, keeping those for which
    /// `f` returns `true`. `f` may rewrite the region in place.
    pub fn retain_regions_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut BoundingRegion) -> bool,
    {
        self.bounding_regions.retain_mut(|r| f(r));
        for child in &mut self.children {
            child.retain_regions_mut(f);
        }
    }
}

/// A business-side invoice line, as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRecord {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub product_code: Option<String>,
    /// Records are highlighted unless the backend says otherwise.
    #[serde(default = "default_should_highlight")]
    pub should_highlight: bool,
}

fn default_should_highlight() -> bool {
    true
}

impl LineItemRecord {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            product_code: None,
            should_highlight: true,
        }
    }

    pub fn with_product_code(mut self, code: impl Into<String>) -> Self {
        self.product_code = Some(code.into());
        self
    }
}

/// Full output of the extraction collaborator for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub unit: LengthUnit,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub fields: Vec<ExtractedField>,
}

impl ExtractionResult {
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        let result: Self =
            serde_json::from_str(json).map_err(|e| TypesError::Json(e.to_string()))?;
        for page in &result.pages {
            page.validate()?;
        }
        Ok(result)
    }
}

/// Parse the line-item list the backend hands over alongside a document.
pub fn line_items_from_json(json: &str) -> Result<Vec<LineItemRecord>, TypesError> {
    serde_json::from_str(json).map_err(|e| TypesError::Json(e.to_string()))
}
