//! Approximate layout of a decoded page content stream
//!
//! Walks the operators with a graphics-state stack and reports where text is
//! shown and where XObjects are painted, in PDF user space (bottom-left
//! origin). Glyph widths are not available without font programs, so every
//! glyph is assumed to be `GLYPH_WIDTH_RATIO` of the font size wide. The
//! result is good enough to keep a notes box off printed content; it is not a
//! text extractor.

use invoice_types::{Point, Rect};
use lopdf::content::Operation;
use lopdf::Object;

const GLYPH_WIDTH_RATIO: f64 = 0.5;
const DESCENT_RATIO: f64 = 0.2;
const ASCENT_RATIO: f64 = 0.8;

/// 2D affine transform `[a b c d e f]` as used by `cm` and `Tm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> Point {
        Point::new(
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Axis-aligned bounds of `rect` after transformation.
    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.apply(rect.x0, rect.y0),
            self.apply(rect.x1, rect.y0),
            self.apply(rect.x0, rect.y1),
            self.apply(rect.x1, rect.y1),
        ];
        // Four finite corners always bound something.
        Rect::bounding(&corners).unwrap_or(*rect)
    }

    pub fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let mut v = [0.0; 6];
        for (slot, obj) in v.iter_mut().zip(operands) {
            *slot = number(obj)?;
        }
        Some(Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    pub fn to_operands(&self) -> Vec<Object> {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .map(|v| Object::Real(*v as f32))
            .collect()
    }
}

/// An XObject painted with `Do`, with the CTM in effect at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct XObjectUse {
    pub name: Vec<u8>,
    pub ctm: Matrix,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentLayout {
    /// One rectangle per text-showing operator
    pub text: Vec<Rect>,
    pub xobjects: Vec<XObjectUse>,
}

pub fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn glyph_count(obj: &Object) -> usize {
    match obj {
        Object::String(bytes, _) => {
            if bytes.starts_with(&[0xFE, 0xFF]) {
                (bytes.len() - 2) / 2
            } else {
                bytes.len()
            }
        }
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    matrix: Matrix,
    line: Matrix,
    font_size: f64,
    leading: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line: Matrix::IDENTITY,
            font_size: 0.0,
            leading: 0.0,
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f64, ty: f64) {
        self.line = Matrix::translate(tx, ty).then(&self.line);
        self.matrix = self.line;
    }

    /// Record a run of `advance` text-space units and move past it.
    fn show(&mut self, advance: f64, ctm: &Matrix, out: &mut Vec<Rect>) {
        let size = self.font_size.abs();
        if advance > 0.0 && size > 0.0 {
            let local = Rect::new(0.0, -DESCENT_RATIO * size, advance, ASCENT_RATIO * size);
            let to_user = self.matrix.then(ctm);
            let rect = to_user.apply_rect(&local);
            if !rect.is_empty() {
                out.push(rect);
            }
        }
        self.matrix = Matrix::translate(advance, 0.0).then(&self.matrix);
    }
}

/// Scan decoded operations. Unknown or malformed operators are skipped.
pub fn scan(operations: &[Operation]) -> ContentLayout {
    let mut layout = ContentLayout::default();
    let mut ctm = Matrix::IDENTITY;
    let mut stack: Vec<Matrix> = Vec::new();
    let mut text = TextState::default();

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "q" => stack.push(ctm),
            "Q" => {
                if let Some(saved) = stack.pop() {
                    ctm = saved;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    ctm = m.then(&ctm);
                }
            }
            "BT" => {
                text.matrix = Matrix::IDENTITY;
                text.line = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    text.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    text.leading = leading;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    if op.operator == "TD" {
                        text.leading = -ty;
                    }
                    text.next_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    text.matrix = m;
                    text.line = m;
                }
            }
            "T*" => {
                let leading = text.leading;
                text.next_line(0.0, -leading);
            }
            "Tj" | "'" | "\"" => {
                if op.operator != "Tj" {
                    let leading = text.leading;
                    text.next_line(0.0, -leading);
                }
                if let Some(s) = operands.last() {
                    let advance = glyph_count(s) as f64 * text.font_size * GLYPH_WIDTH_RATIO;
                    text.show(advance, &ctm, &mut layout.text);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let mut advance = 0.0;
                    for item in items {
                        match item {
                            Object::String(..) => {
                                advance += glyph_count(item) as f64
                                    * text.font_size
                                    * GLYPH_WIDTH_RATIO;
                            }
                            other => {
                                if let Some(adjust) = number(other) {
                                    advance -= adjust / 1000.0 * text.font_size;
                                }
                            }
                        }
                    }
                    text.show(advance, &ctm, &mut layout.text);
                }
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    layout.xobjects.push(XObjectUse {
                        name: name.clone(),
                        ctm,
                    });
                }
            }
            _ => {}
        }
    }

    layout
}
