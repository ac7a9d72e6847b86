//! End-to-end runs of the pipeline against PDFs built with lopdf

use annotate_core::{
    AnnotationConfig, CancellationFlag, Canvas, Correction, LopdfCanvas, PageState, Pipeline,
    SaveMode,
};
use invoice_types::{
    BoundingRegion, ExtractedField, ExtractionResult, FieldKind, LengthUnit, LineItemRecord, Page,
    Rect,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

const TAG: &str = "invoice-engine";

/// One page per `(width, height)`, each showing `lines` of 10pt text at
/// PDF coordinates `(x, y)`.
fn create_test_pdf(pages: &[(i64, i64)], lines: &[(i64, i64, &str)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();

    for &(width, height) in pages {
        let mut operations = Vec::new();
        for &(x, y, text) in lines {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), 10.into()]),
                Operation::new("Td", vec![x.into(), y.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => Object::Reference(content_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

fn line_item(description: &str, page: u32, rect: Rect) -> ExtractedField {
    ExtractedField::new("Items", FieldKind::LineItem, "")
        .with_child(
            ExtractedField::new("Description", FieldKind::LineItem, description)
                .with_region(BoundingRegion::from_rect(page, rect)),
        )
}

fn extraction(pages: Vec<Page>, fields: Vec<ExtractedField>) -> ExtractionResult {
    ExtractionResult {
        unit: LengthUnit::Point,
        pages,
        fields,
    }
}

fn contains_approx(outer: &Rect, inner: &Rect) -> bool {
    let tol = 0.05;
    outer.x0 <= inner.x0 + tol
        && outer.y0 <= inner.y0 + tol
        && outer.x1 >= inner.x1 - tol
        && outer.y1 >= inner.y1 - tol
}

#[test]
fn test_scenario_rotated_page_is_corrected_once_and_persists() {
    let pdf = create_test_pdf(&[(800, 600)], &[(100, 500, "Flour 25kg")]);
    let doc = extraction(
        vec![Page::new(1, 800.0, 600.0).with_angle(-90.0)],
        vec![line_item("Flour 25kg", 1, Rect::new(90.0, 85.0, 200.0, 105.0))],
    );
    let records = vec![LineItemRecord::new("li-1", "flour 25kg")];
    let pipeline = Pipeline::default();
    let cancel = CancellationFlag::new();

    let mut canvas = LopdfCanvas::from_bytes(&pdf).unwrap();
    let report = pipeline.run(&mut canvas, &doc, &records, None, &cancel);

    assert_eq!(report.pages_rotated, 1);
    assert_eq!(report.highlights_applied, 1);
    assert_eq!(report.page_states[&1], PageState::AnnotationsApplied);
    let size = canvas.page_size(1).unwrap();
    assert_eq!((size.width, size.height), (600.0, 800.0));
    assert_eq!(canvas.rotation_marker(1).unwrap(), Some(Correction::Cw90));

    // (x, y) -> (600 - y, x)
    let highlight = canvas
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .find(|a| a.subtype == "Square")
        .unwrap();
    assert!(
        contains_approx(&highlight.rect, &Rect::new(495.0, 90.0, 515.0, 200.0)),
        "{:?}",
        highlight.rect
    );

    // Save, reload and run again: the marker survives and nothing rotates twice.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice.pdf");
    canvas.save(&path, SaveMode::Full).unwrap();

    let mut reloaded = LopdfCanvas::load(&path).unwrap();
    let again = pipeline.run(&mut reloaded, &doc, &records, None, &cancel);
    assert_eq!(again.pages_rotated, 0);
    assert_eq!(reloaded.page_size(1).unwrap().width, 600.0);
    assert_eq!(again.highlights_applied, 1);
}

#[test]
fn test_scenario_two_of_three_records_highlighted() {
    let pdf = create_test_pdf(&[(612, 792)], &[]);
    let doc = extraction(
        vec![Page::new(1, 612.0, 792.0)],
        vec![
            line_item("Tomato passata 6x1kg", 1, Rect::new(40.0, 300.0, 400.0, 315.0)),
            line_item("Mozzarella fior di latte", 1, Rect::new(40.0, 320.0, 400.0, 335.0)),
            line_item("Basil bunch", 1, Rect::new(40.0, 340.0, 400.0, 355.0)),
        ],
    );
    let records = vec![
        LineItemRecord::new("a", "Tomato passata 6x1kg"),
        LineItemRecord::new("b", "mozzarella fior di latte"),
        LineItemRecord::new("c", "Parmigiano 24 months"),
    ];

    let mut canvas = LopdfCanvas::from_bytes(&pdf).unwrap();
    let report =
        Pipeline::default().run(&mut canvas, &doc, &records, None, &CancellationFlag::new());

    assert_eq!(report.highlights_applied, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("Parmigiano"));

    let label = canvas
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .find(|a| a.subtype == "FreeText")
        .unwrap();
    assert_eq!(label.contents.as_deref(), Some("Flagged items: 2"));
}

#[test]
fn test_rerun_after_save_replaces_engine_annotations_only() {
    let pdf = create_test_pdf(&[(612, 792)], &[(50, 700, "ACME FOODS LTD")]);
    let doc = extraction(
        vec![Page::new(1, 612.0, 792.0)],
        vec![line_item("Olive oil 5L", 1, Rect::new(40.0, 300.0, 400.0, 315.0))],
    );
    let records = vec![LineItemRecord::new("a", "Olive oil 5L")];
    let pipeline = Pipeline::default();
    let cancel = CancellationFlag::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice.pdf");

    let mut canvas = LopdfCanvas::from_bytes(&pdf).unwrap();
    canvas
        .add_text_annotation(
            1,
            &Rect::new(10.0, 10.0, 100.0, 30.0),
            "Reviewed",
            &Default::default(),
            "reviewer",
        )
        .unwrap();
    pipeline
        .run_and_save(
            &mut canvas,
            &doc,
            &records,
            Some("Check price"),
            &cancel,
            &path,
            SaveMode::Full,
        )
        .unwrap();
    let first: Vec<_> = LopdfCanvas::load(&path)
        .unwrap()
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .map(|a| (a.subtype, a.tag))
        .collect();

    let mut canvas = LopdfCanvas::load(&path).unwrap();
    let report = pipeline
        .run_and_save(
            &mut canvas,
            &doc,
            &records,
            Some("Check price"),
            &cancel,
            &path,
            SaveMode::Incremental,
        )
        .unwrap();
    let reloaded = LopdfCanvas::load(&path).unwrap();
    let second: Vec<_> = reloaded
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .map(|a| (a.subtype, a.tag))
        .collect();

    assert!(report.notes_applied);
    // Highlight, label, notes box, notes text.
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
    assert_eq!(reloaded.annotations_by_tag(1, "reviewer").unwrap().len(), 1);
}

#[test]
fn test_notes_box_avoids_printed_text() {
    // A footer band of text across the bottom of the page.
    let terms = "Payment terms 30 days net. Bank transfer only. Thank you for your order.";
    let footer: Vec<(i64, i64, &str)> = (0..8).map(|i| (20, 20 + i * 14, terms)).collect();
    let pdf = create_test_pdf(&[(612, 792)], &footer);
    let doc = extraction(vec![Page::new(1, 612.0, 792.0)], vec![]);

    let mut canvas = LopdfCanvas::from_bytes(&pdf).unwrap();
    let text = canvas.text_blocks(1).unwrap();
    assert_eq!(text.len(), 8);

    let report = Pipeline::default().run(
        &mut canvas,
        &doc,
        &[],
        Some("Two cases arrived damaged."),
        &CancellationFlag::new(),
    );
    assert!(report.notes_applied);
    assert!(!report.degraded_placement);

    let notes = canvas
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .find(|a| a.subtype == "Square")
        .unwrap();
    for block in &text {
        assert_eq!(notes.rect.intersection_area(block), 0.0, "{:?} vs {:?}", notes.rect, block);
    }
}

#[test]
fn test_scenario_long_note_reports_font_floor() {
    let pdf = create_test_pdf(&[(612, 792)], &[]);
    let doc = extraction(vec![Page::new(1, 612.0, 792.0)], vec![]);
    let note = "Supplier shorted two cases of tomatoes and invoiced both. ".repeat(9);
    let note = &note[..500];

    let mut canvas = LopdfCanvas::from_bytes(&pdf).unwrap();
    let report = Pipeline::new(AnnotationConfig::default()).run(
        &mut canvas,
        &doc,
        &[],
        Some(note),
        &CancellationFlag::new(),
    );

    assert!(report.notes_applied);
    assert!(report.notes_truncated);
    assert_eq!(report.notes_font_size, Some(6.0));
    let text = canvas
        .annotations_by_tag(1, TAG)
        .unwrap()
        .into_iter()
        .find_map(|a| a.contents)
        .unwrap();
    assert!(text.lines().count() <= 6);
    assert!(text.ends_with("..."));
}

#[test]
fn test_process_file_writes_output_and_keeps_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    let pdf = create_test_pdf(&[(612, 792), (612, 792)], &[]);
    std::fs::write(&input, &pdf).unwrap();

    let doc = extraction(
        vec![Page::new(1, 612.0, 792.0), Page::new(2, 612.0, 792.0)],
        vec![line_item("Sea salt 1kg", 2, Rect::new(40.0, 300.0, 400.0, 315.0))],
    );
    let report = Pipeline::default()
        .process_file(
            &input,
            &output,
            SaveMode::Full,
            &doc,
            &[LineItemRecord::new("a", "Sea salt 1kg")],
            None,
            &CancellationFlag::new(),
        )
        .unwrap();

    assert_eq!(report.highlights_applied, 1);
    assert_eq!(std::fs::read(&input).unwrap(), pdf);
    let annotated = LopdfCanvas::load(&output).unwrap();
    assert!(annotated.annotations_by_tag(1, TAG).unwrap().is_empty());
    assert_eq!(annotated.annotations_by_tag(2, TAG).unwrap().len(), 2);
}

#[test]
fn test_unreadable_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.pdf");
    std::fs::write(&input, b"not a pdf").unwrap();

    let err = Pipeline::default()
        .process_file(
            &input,
            &dir.path().join("out.pdf"),
            SaveMode::Full,
            &extraction(vec![], vec![]),
            &[],
            None,
            &CancellationFlag::new(),
        )
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(!dir.path().join("out.pdf").exists());
}
