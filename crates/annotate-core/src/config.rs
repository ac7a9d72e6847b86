//! Visual constants and thresholds for the annotation engine
//!
//! Every knob lives in [`AnnotationConfig`], which can be loaded from TOML.
//! Missing keys fall back to the defaults listed on each field.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Rounding behavior for angles that sit exactly between two right angles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// 45° rounds to 90°, -135° rounds to -180°.
    #[default]
    AwayFromZero,
    /// 45° rounds to 0°, -135° rounds to -90°.
    TowardZero,
}

/// Font size search range for fitting notes text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FontBounds {
    pub min: f64,
    pub max: f64,
    /// Decrement applied on each fitting attempt
    #[serde(default = "default_font_step")]
    pub step: f64,
}

fn default_font_step() -> f64 {
    0.5
}

impl Default for FontBounds {
    fn default() -> Self {
        Self {
            min: 6.0,
            max: 11.0,
            step: default_font_step(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Tag written on every engine-authored annotation (default: "invoice-engine")
    pub tag: String,
    /// Prefix of the summary label (default: "Flagged items")
    pub header_label: String,
    /// Summary label text color
    pub header_color: String,
    /// Highlight fill color
    pub highlight_color: String,
    /// Highlight fill opacity, 0-1
    pub highlight_opacity: f64,
    /// Notes box fill color
    pub notes_box_color: String,
    /// Notes text color
    pub notes_text_color: String,
    /// Notes box width as a fraction of the page width
    pub box_width_ratio: f64,
    /// Notes box height as a fraction of the page height
    pub box_height_ratio: f64,
    /// Notes box minimum width in points
    pub min_width: f64,
    /// Notes box minimum height in points
    pub min_height: f64,
    /// Maximum number of notes text lines
    pub max_lines: usize,
    pub font_bounds: FontBounds,
    /// Average glyph advance as a fraction of the font size
    pub char_width_ratio: f64,
    /// Line pitch as a fraction of the font size
    pub line_height_ratio: f64,
    /// Distance kept from the page edge, as a fraction of the page width
    pub margin_ratio: f64,
    /// Overlap tolerated for a candidate box, as a fraction of the page area
    pub overlap_threshold_ratio: f64,
    /// Minimum token-overlap similarity for a fuzzy match
    pub fuzzy_threshold: f64,
    pub tie_break: TieBreak,
    /// Pixel-scale multiplier handed to the canvas when a page is re-rendered
    pub render_scale: f64,
    /// Resolution assumed for extraction output measured in pixels
    pub pixel_dpi: f64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            tag: "invoice-engine".to_string(),
            header_label: "Flagged items".to_string(),
            header_color: "#C0392B".to_string(),
            highlight_color: "#FFE066".to_string(),
            highlight_opacity: 0.35,
            notes_box_color: "#FFF7D6".to_string(),
            notes_text_color: "#222222".to_string(),
            box_width_ratio: 0.38,
            box_height_ratio: 0.16,
            min_width: 180.0,
            min_height: 72.0,
            max_lines: 6,
            font_bounds: FontBounds::default(),
            char_width_ratio: 0.5,
            line_height_ratio: 1.2,
            margin_ratio: 0.02,
            overlap_threshold_ratio: 0.0005,
            fuzzy_threshold: 0.85,
            tie_break: TieBreak::default(),
            render_scale: 2.0,
            pixel_dpi: 96.0,
        }
    }
}

impl AnnotationConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed, or
    /// the resulting values fail [`AnnotationConfig::validate`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Example
    ///
    /// ```
    /// use annotate_core::config::AnnotationConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = AnnotationConfig::from_str(r#"
    ///     header_label = "Price changes"
    ///     max_lines = 4
    ///
    ///     [font_bounds]
    ///     min = 7.0
    ///     max = 12.0
    /// "#)?;
    /// assert_eq!(config.max_lines, 4);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tag.trim().is_empty() {
            bail!("tag must not be empty");
        }
        let fb = &self.font_bounds;
        if !(fb.min > 0.0 && fb.max >= fb.min) {
            bail!(
                "font_bounds must satisfy 0 < min <= max (got min={}, max={})",
                fb.min,
                fb.max
            );
        }
        if fb.step <= 0.0 {
            bail!("font_bounds.step must be positive (got {})", fb.step);
        }
        if self.max_lines == 0 {
            bail!("max_lines must be at least 1");
        }
        for (name, value) in [
            ("box_width_ratio", self.box_width_ratio),
            ("box_height_ratio", self.box_height_ratio),
            ("margin_ratio", self.margin_ratio),
            ("fuzzy_threshold", self.fuzzy_threshold),
            ("highlight_opacity", self.highlight_opacity),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                bail!("{} must be in (0, 1] (got {})", name, value);
            }
        }
        if self.overlap_threshold_ratio < 0.0 {
            bail!("overlap_threshold_ratio must not be negative");
        }
        if self.render_scale <= 0.0 || self.pixel_dpi <= 0.0 {
            bail!("render_scale and pixel_dpi must be positive");
        }
        if self.char_width_ratio <= 0.0 || self.line_height_ratio <= 0.0 {
            bail!("char_width_ratio and line_height_ratio must be positive");
        }
        Ok(())
    }
}
