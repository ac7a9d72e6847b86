//! Desired annotation set for a document
//!
//! This module provides the data structures describing what the engine wants
//! drawn on each page: highlights over matched line items, a summary label and
//! a notes box. A plan is computed without touching the document and applied
//! later in one pass per page.

use invoice_types::Rect;
use serde::{Deserialize, Serialize};

/// Stroke and fill of a rectangle annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoxStyle {
    pub stroke: Option<String>,
    pub fill: Option<String>,
    pub opacity: f64,
    pub border_width: f64,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            stroke: Some("#000000".to_string()),
            fill: None,
            opacity: 1.0,
            border_width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextStyle {
    pub font_size: f64,
    pub color: String,
    #[serde(default)]
    pub is_bold: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: 10.0,
            color: "#000000".to_string(),
            is_bold: false,
        }
    }
}

impl TextStyle {
    /// Standard-14 font name for this style.
    pub fn pdf_font_name(&self) -> &'static str {
        if self.is_bold {
            "Helvetica-Bold"
        } else {
            "Helvetica"
        }
    }
}

/// `#RRGGBB` (leading `#` optional) as 0-1 floats. Anything unparsable is black.
pub fn parse_hex_color(color: &str) -> (f32, f32, f32) {
    let digits = color.trim().trim_start_matches('#');
    let channel = |i: usize| {
        digits
            .get(i..i + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
    };
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => (
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
        ),
        _ => (0.0, 0.0, 0.0),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Highlight,
    Label,
    NotesBox,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AnnotationRequest {
    Highlight {
        page: u32,
        rect: Rect,
        style: BoxStyle,
        /// Line item this highlight belongs to
        record_id: String,
    },
    Label {
        page: u32,
        rect: Rect,
        text: String,
        style: TextStyle,
    },
    NotesBox {
        page: u32,
        rect: Rect,
        box_style: BoxStyle,
        /// Already wrapped to fit `rect`
        lines: Vec<String>,
        text_style: TextStyle,
        /// Placement fell back to a box that overlaps page content
        degraded: bool,
        truncated: bool,
    },
}

impl AnnotationRequest {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            AnnotationRequest::Highlight { .. } => AnnotationKind::Highlight,
            AnnotationRequest::Label { .. } => AnnotationKind::Label,
            AnnotationRequest::NotesBox { .. } => AnnotationKind::NotesBox,
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            AnnotationRequest::Highlight { page, .. } => *page,
            AnnotationRequest::Label { page, .. } => *page,
            AnnotationRequest::NotesBox { page, .. } => *page,
        }
    }

    pub fn rect(&self) -> &Rect {
        match self {
            AnnotationRequest::Highlight { rect, .. } => rect,
            AnnotationRequest::Label { rect, .. } => rect,
            AnnotationRequest::NotesBox { rect, .. } => rect,
        }
    }
}

/// Ordered set of annotation requests for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationPlan {
    requests: Vec<AnnotationRequest>,
}

impl AnnotationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: AnnotationRequest) {
        self.requests.push(request);
    }

    pub fn extend<I: IntoIterator<Item = AnnotationRequest>>(&mut self, requests: I) {
        self.requests.extend(requests);
    }

    pub fn requests(&self) -> &[AnnotationRequest] {
        &self.requests
    }

    pub fn requests_for_page(&self, page: u32) -> Vec<&AnnotationRequest> {
        self.requests.iter().filter(|r| r.page() == page).collect()
    }

    pub fn count(&self, kind: AnnotationKind) -> usize {
        self.requests.iter().filter(|r| r.kind() == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
