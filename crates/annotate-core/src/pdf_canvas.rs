//! [`Canvas`] over an in-memory `lopdf` document
//!
//! Canonical coordinates (points, top-left origin) are converted to PDF user
//! space against the page MediaBox on the way in and back on the way out.
//!
//! Rotation redraws the vector content: the existing content streams are
//! wrapped in `q <matrix> cm ... Q`, the MediaBox is swapped, and existing
//! annotation rectangles are remapped with the same matrix. The applied
//! correction is stored under [`ROTATION_KEY`] on the page dictionary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use invoice_types::Rect;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info};

use crate::canvas::{AnnotationInfo, Canvas, PageSize, SaveMode};
use crate::content_scan::{number, scan, ContentLayout, Matrix};
use crate::error::AnnotateError;
use crate::operations::{parse_hex_color, BoxStyle, TextStyle};
use crate::transform::Correction;

/// Private page key recording the clockwise correction already applied.
pub const ROTATION_KEY: &[u8] = b"AnnotateCorrection";

/// Page tree depth limit when resolving inherited attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Annotation flag: print.
const FLAG_PRINT: i64 = 4;

const BOX_KEYS: [&[u8]; 4] = [b"CropBox", b"BleedBox", b"TrimBox", b"ArtBox"];

pub struct LopdfCanvas {
    doc: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LopdfCanvas {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnnotateError> {
        let path = path.as_ref();
        let doc = Document::load(path)
            .map_err(|e| AnnotateError::ParseError(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_document(doc))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnnotateError> {
        let doc = Document::load_mem(bytes).map_err(|e| AnnotateError::ParseError(e.to_string()))?;
        Ok(Self::from_document(doc))
    }

    pub fn from_document(doc: Document) -> Self {
        let pages = doc.get_pages();
        Self { doc, pages }
    }

    fn page_id(&self, page: u32) -> Result<ObjectId, AnnotateError> {
        self.pages
            .get(&page)
            .copied()
            .ok_or_else(|| AnnotateError::Canvas(format!("page {} out of range", page)))
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(obj),
            other => other,
        }
    }

    fn page_dict(&self, page_id: ObjectId) -> Result<&Dictionary, AnnotateError> {
        self.doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| AnnotateError::Canvas(e.to_string()))
    }

    fn page_dict_mut(&mut self, page_id: ObjectId) -> Result<&mut Dictionary, AnnotateError> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| AnnotateError::Canvas(e.to_string()))
    }

    /// Page attribute, following `/Parent` for inheritable keys.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut current = self.page_dict(page_id).ok()?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = current.get(key) {
                return Some(self.resolve(value));
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.doc.get_object(parent).ok()?.as_dict().ok()?;
        }
        None
    }

    /// MediaBox in PDF user space.
    fn media_box(&self, page_id: ObjectId) -> Result<Rect, AnnotateError> {
        let values = self
            .inherited(page_id, b"MediaBox")
            .and_then(|obj| obj.as_array().ok())
            .ok_or_else(|| AnnotateError::Canvas("page has no MediaBox".to_string()))?;
        rect_from_array(self, values)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AnnotateError::Canvas("malformed MediaBox".to_string()))
    }

    fn layout(&self, page: u32, page_id: ObjectId) -> Result<ContentLayout, AnnotateError> {
        let bytes = self
            .doc
            .get_page_content(page_id)
            .map_err(|e| AnnotateError::PageRender {
                page,
                reason: e.to_string(),
            })?;
        let content = Content::decode(&bytes).map_err(|e| AnnotateError::PageRender {
            page,
            reason: e.to_string(),
        })?;
        Ok(scan(&content.operations))
    }

    /// The page's annotation array and, when it lives in its own object, that object's id.
    fn annots(&self, page_id: ObjectId) -> Result<(Option<ObjectId>, Vec<Object>), AnnotateError> {
        match self.page_dict(page_id)?.get(b"Annots") {
            Ok(Object::Array(items)) => Ok((None, items.clone())),
            Ok(Object::Reference(id)) => {
                let items = self
                    .doc
                    .get_object(*id)
                    .and_then(Object::as_array)
                    .map_err(|e| AnnotateError::Canvas(e.to_string()))?;
                Ok((Some(*id), items.clone()))
            }
            _ => Ok((None, Vec::new())),
        }
    }

    fn store_annots(
        &mut self,
        page_id: ObjectId,
        holder: Option<ObjectId>,
        annots: Vec<Object>,
    ) -> Result<(), AnnotateError> {
        match holder {
            Some(id) => {
                let slot = self
                    .doc
                    .get_object_mut(id)
                    .map_err(|e| AnnotateError::Canvas(e.to_string()))?;
                *slot = Object::Array(annots);
            }
            None => self.page_dict_mut(page_id)?.set("Annots", Object::Array(annots)),
        }
        Ok(())
    }

    fn annot_dict<'a>(&'a self, entry: &'a Object) -> Option<&'a Dictionary> {
        self.resolve(entry).as_dict().ok()
    }

    fn push_annotation(
        &mut self,
        page: u32,
        mut annot: Dictionary,
        tag: &str,
    ) -> Result<(), AnnotateError> {
        let page_id = self.page_id(page)?;
        let id = self.doc.new_object_id();
        annot.set("Type", Object::Name(b"Annot".to_vec()));
        annot.set("T", pdf_text(tag));
        annot.set("NM", pdf_text(&format!("{}-{}-{}", tag, id.0, id.1)));
        annot.set("P", Object::Reference(page_id));
        annot.set("F", Object::Integer(FLAG_PRINT));
        self.doc.objects.insert(id, Object::Dictionary(annot));

        let (holder, mut annots) = self.annots(page_id)?;
        annots.push(Object::Reference(id));
        self.store_annots(page_id, holder, annots)
    }

    /// Canonical rectangle to a PDF `/Rect` array.
    fn to_pdf_rect(frame: &Rect, rect: &Rect) -> Object {
        rect_to_array(&Rect::new(
            frame.x0 + rect.x0,
            frame.y1 - rect.y1,
            frame.x0 + rect.x1,
            frame.y1 - rect.y0,
        ))
    }

    fn to_canonical(frame: &Rect, pdf: &Rect) -> Rect {
        Rect::new(
            pdf.x0 - frame.x0,
            frame.y1 - pdf.y1,
            pdf.x1 - frame.x0,
            frame.y1 - pdf.y0,
        )
    }

    /// Rectangle painted by an XObject, in user space.
    fn xobject_extent(&self, page_id: ObjectId, name: &[u8], ctm: &Matrix) -> Option<Rect> {
        let unit = Rect::new(0.0, 0.0, 1.0, 1.0);
        let stream = self
            .inherited(page_id, b"Resources")
            .and_then(|r| r.as_dict().ok())
            .and_then(|r| r.get(b"XObject").ok())
            .map(|x| self.resolve(x))
            .and_then(|x| x.as_dict().ok())
            .and_then(|x| x.get(name).ok())
            .map(|s| self.resolve(s))
            .and_then(|s| s.as_stream().ok());

        let Some(stream) = stream else {
            // Unresolvable: assume an image.
            return Some(ctm.apply_rect(&unit));
        };

        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Form") => {
                let bbox = stream
                    .dict
                    .get(b"BBox")
                    .ok()
                    .and_then(|b| b.as_array().ok())
                    .and_then(|b| rect_from_array(self, b))?;
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| m.as_array().ok())
                    .and_then(|m| Matrix::from_operands(m))
                    .unwrap_or(Matrix::IDENTITY);
                Some(form_matrix.then(ctm).apply_rect(&bbox))
            }
            Ok(b"PS") => None,
            _ => Some(ctm.apply_rect(&unit)),
        }
    }

    /// Apply `matrix` to an annotation's `/Rect` and `/QuadPoints`.
    fn remap_annotation(&self, annot: &mut Dictionary, matrix: &Matrix) {
        let rect = annot
            .get(b"Rect")
            .ok()
            .and_then(|r| r.as_array().ok())
            .and_then(|r| rect_from_array(self, r));
        if let Some(rect) = rect {
            annot.set("Rect", rect_to_array(&matrix.apply_rect(&rect)));
        }

        let quads = annot
            .get(b"QuadPoints")
            .ok()
            .and_then(|q| q.as_array().ok())
            .map(|q| q.iter().filter_map(number).collect::<Vec<f64>>());
        if let Some(quads) = quads {
            let mapped = quads
                .chunks_exact(2)
                .flat_map(|pair| {
                    let p = matrix.apply(pair[0], pair[1]);
                    [Object::Real(p.x as f32), Object::Real(p.y as f32)]
                })
                .collect();
            annot.set("QuadPoints", Object::Array(mapped));
        }
    }
}

/// Matrix redrawing a `media` page rotated clockwise by `correction` onto a
/// new page with its origin at zero.
pub fn rotation_matrix(correction: Correction, media: &Rect) -> Matrix {
    let (w, h) = (media.width(), media.height());
    let turn = match correction {
        Correction::None => Matrix::IDENTITY,
        Correction::Cw90 => Matrix::new(0.0, -1.0, 1.0, 0.0, 0.0, w),
        Correction::Cw180 => Matrix::new(-1.0, 0.0, 0.0, -1.0, w, h),
        Correction::Cw270 => Matrix::new(0.0, 1.0, -1.0, 0.0, h, 0.0),
    };
    Matrix::translate(-media.x0, -media.y0).then(&turn)
}

fn rect_from_array(canvas: &LopdfCanvas, values: &[Object]) -> Option<Rect> {
    if values.len() != 4 {
        return None;
    }
    let mut v = [0.0; 4];
    for (slot, obj) in v.iter_mut().zip(values) {
        *slot = number(canvas.resolve(obj))?;
    }
    Some(Rect::new(v[0], v[1], v[2], v[3]))
}

fn rect_to_array(rect: &Rect) -> Object {
    Object::Array(vec![
        Object::Real(rect.x0 as f32),
        Object::Real(rect.y0 as f32),
        Object::Real(rect.x1 as f32),
        Object::Real(rect.y1 as f32),
    ])
}

fn rgb(color: &str) -> Object {
    let (r, g, b) = parse_hex_color(color);
    Object::Array(vec![Object::Real(r), Object::Real(g), Object::Real(b)])
}

/// PDF text string: plain literal for ASCII, UTF-16BE with BOM otherwise.
fn pdf_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Latin-1 fallback
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key) {
        Ok(Object::String(bytes, _)) => Some(decode_text(bytes)),
        _ => None,
    }
}

fn encode_ops(page: u32, operations: Vec<Operation>) -> Result<Vec<u8>, AnnotateError> {
    Content { operations }
        .encode()
        .map_err(|e| AnnotateError::PageRender {
            page,
            reason: e.to_string(),
        })
}

impl Canvas for LopdfCanvas {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self, page: u32) -> Result<PageSize, AnnotateError> {
        let media = self.media_box(self.page_id(page)?)?;
        Ok(PageSize {
            width: media.width(),
            height: media.height(),
        })
    }

    fn rotation_marker(&self, page: u32) -> Result<Option<Correction>, AnnotateError> {
        let dict = self.page_dict(self.page_id(page)?)?;
        Ok(dict
            .get(ROTATION_KEY)
            .ok()
            .and_then(number)
            .and_then(|deg| Correction::from_degrees(deg as i32))
            .filter(|c| !c.is_identity()))
    }

    fn rotate_page(
        &mut self,
        page: u32,
        correction: Correction,
        _render_scale: f64,
    ) -> Result<PageSize, AnnotateError> {
        let page_id = self.page_id(page)?;
        let media = self.media_box(page_id).map_err(|e| AnnotateError::PageRender {
            page,
            reason: e.to_string(),
        })?;
        if correction.is_identity() {
            return Ok(PageSize {
                width: media.width(),
                height: media.height(),
            });
        }

        let matrix = rotation_matrix(correction, &media);
        let (new_w, new_h) = if correction.swaps_dimensions() {
            (media.height(), media.width())
        } else {
            (media.width(), media.height())
        };

        let existing = match self.page_dict(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => {
                return Err(AnnotateError::PageRender {
                    page,
                    reason: "unsupported /Contents entry".to_string(),
                })
            }
            Err(_) => Vec::new(),
        };

        let pre = encode_ops(
            page,
            vec![
                Operation::new("q", vec![]),
                Operation::new("cm", matrix.to_operands()),
            ],
        )?;
        // Streams are concatenated; the old content may not end in whitespace.
        let mut post = b"\n".to_vec();
        post.extend(encode_ops(page, vec![Operation::new("Q", vec![])])?);
        let pre_id = self.doc.add_object(Stream::new(Dictionary::new(), pre));
        let post_id = self.doc.add_object(Stream::new(Dictionary::new(), post));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(Object::Reference(pre_id));
        contents.extend(existing);
        contents.push(Object::Reference(post_id));

        // Existing annotations follow the content.
        let (holder, mut annots) = self.annots(page_id)?;
        for entry in annots.iter_mut() {
            match entry {
                Object::Reference(id) => {
                    let mut dict = match self.doc.get_object(*id).and_then(Object::as_dict) {
                        Ok(d) => d.clone(),
                        Err(_) => continue,
                    };
                    self.remap_annotation(&mut dict, &matrix);
                    if let Ok(slot) = self.doc.get_object_mut(*id) {
                        *slot = Object::Dictionary(dict);
                    }
                }
                Object::Dictionary(dict) => {
                    let mut copy = dict.clone();
                    self.remap_annotation(&mut copy, &matrix);
                    *dict = copy;
                }
                _ => {}
            }
        }
        if !annots.is_empty() {
            self.store_annots(page_id, holder, annots)?;
        }

        let applied = match self.rotation_marker(page)? {
            Some(previous) => {
                Correction::from_degrees(previous.degrees() + correction.degrees())
                    .unwrap_or(correction)
            }
            None => correction,
        };

        let dict = self.page_dict_mut(page_id)?;
        dict.set("Contents", Object::Array(contents));
        dict.set(
            "MediaBox",
            rect_to_array(&Rect::new(0.0, 0.0, new_w, new_h)),
        );
        for key in BOX_KEYS {
            dict.remove(key);
        }
        dict.set(ROTATION_KEY, Object::Integer(applied.degrees() as i64));

        info!(page, degrees = correction.degrees(), "Rotated page content");
        Ok(PageSize {
            width: new_w,
            height: new_h,
        })
    }

    fn text_blocks(&self, page: u32) -> Result<Vec<Rect>, AnnotateError> {
        let page_id = self.page_id(page)?;
        let frame = self.media_box(page_id)?;
        let layout = self.layout(page, page_id)?;
        Ok(layout
            .text
            .iter()
            .map(|r| Self::to_canonical(&frame, r))
            .collect())
    }

    fn image_blocks(&self, page: u32) -> Result<Vec<Rect>, AnnotateError> {
        let page_id = self.page_id(page)?;
        let frame = self.media_box(page_id)?;
        let layout = self.layout(page, page_id)?;
        Ok(layout
            .xobjects
            .iter()
            .filter_map(|x| self.xobject_extent(page_id, &x.name, &x.ctm))
            .map(|r| Self::to_canonical(&frame, &r))
            .filter(|r| !r.is_empty())
            .collect())
    }

    fn add_rectangle_annotation(
        &mut self,
        page: u32,
        rect: &Rect,
        style: &BoxStyle,
        tag: &str,
    ) -> Result<(), AnnotateError> {
        let frame = self.media_box(self.page_id(page)?)?;
        let mut annot = Dictionary::new();
        annot.set("Subtype", Object::Name(b"Square".to_vec()));
        annot.set("Rect", Self::to_pdf_rect(&frame, rect));
        annot.set(
            "C",
            style
                .stroke
                .as_deref()
                .map(rgb)
                .unwrap_or_else(|| Object::Array(vec![])),
        );
        if let Some(fill) = style.fill.as_deref() {
            annot.set("IC", rgb(fill));
        }
        annot.set("CA", Object::Real(style.opacity.clamp(0.0, 1.0) as f32));

        let mut bs = Dictionary::new();
        bs.set("W", Object::Real(style.border_width.max(0.0) as f32));
        annot.set("BS", Object::Dictionary(bs));

        self.push_annotation(page, annot, tag)
    }

    fn add_text_annotation(
        &mut self,
        page: u32,
        rect: &Rect,
        text: &str,
        style: &TextStyle,
        tag: &str,
    ) -> Result<(), AnnotateError> {
        let frame = self.media_box(self.page_id(page)?)?;
        let mut annot = Dictionary::new();
        annot.set("Subtype", Object::Name(b"FreeText".to_vec()));
        annot.set("Rect", Self::to_pdf_rect(&frame, rect));
        annot.set("Contents", pdf_text(text));

        let (r, g, b) = parse_hex_color(&style.color);
        let da = format!(
            "/{} {} Tf {} {} {} rg",
            style.pdf_font_name(),
            style.font_size,
            r,
            g,
            b
        );
        annot.set("DA", Object::String(da.into_bytes(), StringFormat::Literal));
        annot.set("Q", Object::Integer(0));

        let mut bs = Dictionary::new();
        bs.set("W", Object::Integer(0));
        annot.set("BS", Object::Dictionary(bs));

        self.push_annotation(page, annot, tag)
    }

    fn remove_annotations_by_tag(&mut self, page: u32, tag: &str) -> Result<usize, AnnotateError> {
        let page_id = self.page_id(page)?;
        let (holder, annots) = self.annots(page_id)?;
        if annots.is_empty() {
            return Ok(0);
        }

        let mut kept = Vec::with_capacity(annots.len());
        let mut dropped = Vec::new();
        for entry in annots {
            let tagged = self
                .annot_dict(&entry)
                .and_then(|d| text_entry(d, b"T"))
                .is_some_and(|t| t == tag);
            if tagged {
                dropped.push(entry);
            } else {
                kept.push(entry);
            }
        }

        let removed = dropped.len();
        if removed > 0 {
            self.store_annots(page_id, holder, kept)?;
            for entry in dropped {
                if let Object::Reference(id) = entry {
                    self.doc.objects.remove(&id);
                }
            }
            debug!(page, removed, tag, "Removed tagged annotations");
        }
        Ok(removed)
    }

    fn annotations(&self, page: u32) -> Result<Vec<AnnotationInfo>, AnnotateError> {
        let page_id = self.page_id(page)?;
        let frame = self.media_box(page_id)?;
        let (_, annots) = self.annots(page_id)?;

        Ok(annots
            .iter()
            .filter_map(|entry| self.annot_dict(entry))
            .map(|dict| {
                let subtype = dict
                    .get(b"Subtype")
                    .and_then(Object::as_name)
                    .map(|n| String::from_utf8_lossy(n).into_owned())
                    .unwrap_or_default();
                let rect = dict
                    .get(b"Rect")
                    .ok()
                    .and_then(|r| r.as_array().ok())
                    .and_then(|r| rect_from_array(self, r))
                    .map(|r| Self::to_canonical(&frame, &r))
                    .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
                AnnotationInfo {
                    subtype,
                    rect,
                    tag: text_entry(dict, b"T"),
                    contents: text_entry(dict, b"Contents"),
                }
            })
            .collect())
    }

    fn save(&mut self, destination: &Path, mode: SaveMode) -> Result<(), AnnotateError> {
        let dir = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".annotate-")
            .suffix(".pdf")
            .tempfile_in(&dir)
            .map_err(|e| AnnotateError::Save(format!("{}: {}", dir.display(), e)))?;

        if mode == SaveMode::Full {
            self.doc.prune_objects();
            self.doc.compress();
        }
        self.doc
            .save_to(tmp.as_file_mut())
            .map_err(|e| AnnotateError::Save(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| AnnotateError::Save(e.to_string()))?;
        tmp.persist(destination)
            .map_err(|e| AnnotateError::Save(format!("{}: {}", destination.display(), e.error)))?;

        info!(path = %destination.display(), ?mode, "Saved document");
        Ok(())
    }
}
