mod font;

use std::collections::BTreeMap;

use anyhow::Context;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::core::config::{AnnotationSettings, CoordinateOrigin, ScoreScale};
use crate::services::grading_delegate::DetectionResult;

pub(crate) use font::AnnotationFont;

const MARK_TAG: &[u8] = b"GradeAnnotation";
const CORRECT_GLYPH: char = '\u{2713}';
const INCORRECT_GLYPH: char = '\u{2718}';
const MARK_SIZE: f32 = 26.0;
const POINTS_SIZE: f32 = 20.0;
const TOTAL_SIZE: f32 = 30.0;
const MARK_OFFSET_X: f64 = -50.0;
const POINTS_OFFSET_X: f64 = 15.0;
const TOTAL_INSET_X: f64 = 50.0;
const TOTAL_INSET_TOP: f64 = 100.0;
const ACCENT_RGB: [f32; 3] = [1.0, 0.0, 0.0];
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub(crate) struct AnnotatedDocument {
    pub(crate) bytes: Vec<u8>,
    pub(crate) total_score: f64,
    /// Number of tagged marks drawn, the total label included.
    pub(crate) marks: usize,
}

/// Draws correctness marks, per-question points and the total onto a document's first page.
#[derive(Debug, Clone)]
pub(crate) struct Annotator {
    font: AnnotationFont,
    coordinate_origin: CoordinateOrigin,
    score_scale: ScoreScale,
}

struct PendingText {
    text: Object,
    x: f64,
    y: f64,
    size: f32,
}

impl Annotator {
    pub(crate) fn new(
        font: AnnotationFont,
        coordinate_origin: CoordinateOrigin,
        score_scale: ScoreScale,
    ) -> Self {
        Self { font, coordinate_origin, score_scale }
    }

    pub(crate) fn from_settings(settings: &AnnotationSettings) -> anyhow::Result<Self> {
        let font = AnnotationFont::load(settings.font_path.as_deref())?;
        Ok(Self::new(font, settings.coordinate_origin, settings.score_scale))
    }

    pub(crate) fn denominator(&self, rubric_total: f64) -> f64 {
        match self.score_scale {
            ScoreScale::Fixed(value) => value,
            ScoreScale::RubricTotal => rubric_total,
        }
    }

    /// Annotates `pdf` and returns the new document with its total score.
    ///
    /// The input must be the pristine raw document; annotating an annotated document stacks marks.
    pub(crate) fn annotate(
        &self,
        pdf: &[u8],
        detections: &[DetectionResult],
        rubric_total: f64,
    ) -> anyhow::Result<AnnotatedDocument> {
        let mut doc = Document::load_mem(pdf).context("Failed to parse document")?;
        let page_id = first_page(&doc)?;
        let [llx, lly, urx, ury] = media_box(&doc, page_id);
        let to_pdf = |x: f64, y: f64| match self.coordinate_origin {
            CoordinateOrigin::TopLeft => (llx + x, ury - y),
            CoordinateOrigin::BottomLeft => (llx + x, lly + y),
        };
        tracing::trace!(llx, lly, urx, ury, "Annotating first page");

        let mut used = BTreeMap::new();
        let mut pending = Vec::with_capacity(detections.len() * 2 + 1);
        let mut total_score = 0.0;

        for detection in detections {
            let awarded = detection.awarded_points();
            total_score += awarded;

            let glyph = if detection.is_correct { CORRECT_GLYPH } else { INCORRECT_GLYPH };
            let mark_x = detection.bounding_box.x0 + MARK_OFFSET_X;
            let (x, y) = to_pdf(mark_x, detection.bounding_box.y0);
            pending.push(PendingText {
                text: self.font.encode(&glyph.to_string(), &mut used),
                x,
                y,
                size: MARK_SIZE,
            });

            let (x, y) = to_pdf(mark_x + POINTS_OFFSET_X, detection.bounding_box.y0);
            pending.push(PendingText {
                text: self.font.encode(&format_points(awarded), &mut used),
                x,
                y,
                size: POINTS_SIZE,
            });
        }

        let denominator = format_points(self.denominator(rubric_total));
        let label = format!("{}/{denominator}", format_points(total_score));
        pending.push(PendingText {
            text: self.font.encode(&label, &mut used),
            x: llx + TOTAL_INSET_X,
            y: ury - TOTAL_INSET_TOP,
            size: TOTAL_SIZE,
        });

        let font_id = self.font.embed(&mut doc, &used)?;
        let font_name = register_font(&mut doc, page_id, font_id)?;
        let marks = pending.len();
        let content = annotation_content(&font_name, pending)?;
        append_isolated_content(&mut doc, page_id, content)?;

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).context("Failed to serialize annotated document")?;

        Ok(AnnotatedDocument { bytes, total_score, marks })
    }
}

/// Counts tagged annotation marks on the first page of `pdf`.
#[cfg(test)]
pub(crate) fn count_marks(pdf: &[u8]) -> anyhow::Result<usize> {
    let doc = Document::load_mem(pdf).context("Failed to parse document")?;
    let page_id = first_page(&doc)?;
    let content =
        doc.get_and_decode_page_content(page_id).context("Failed to decode page content")?;

    Ok(content
        .operations
        .iter()
        .filter(|operation| {
            operation.operator == "BMC"
                && operation.operands.first().and_then(|operand| operand.as_name().ok())
                    == Some(MARK_TAG)
        })
        .count())
}

/// Points without a trailing `.0`; fractional values keep at most two decimals.
pub(crate) fn format_points(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        return format!("{}", value.round() as i64);
    }

    let formatted = format!("{value:.2}");
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn first_page(doc: &Document) -> anyhow::Result<ObjectId> {
    doc.get_pages().get(&1).copied().context("Document has no pages")
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(node_id) = current {
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };

        if let Ok(value) = node.get(b"MediaBox") {
            let resolved = match value {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
            if let Some(rect) = resolved.and_then(|object| parse_rect(object)) {
                return rect;
            }
        }

        depth += 1;
        if depth > MAX_TREE_DEPTH {
            break;
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    DEFAULT_MEDIA_BOX
}

fn parse_rect(object: &Object) -> Option<[f64; 4]> {
    let values = object.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }

    let mut parsed = [0.0; 4];
    for (slot, value) in parsed.iter_mut().zip(values) {
        *slot = f64::from(value.as_float().ok()?);
    }

    Some([
        parsed[0].min(parsed[2]),
        parsed[1].min(parsed[3]),
        parsed[0].max(parsed[2]),
        parsed[1].max(parsed[3]),
    ])
}

fn annotation_content(font_name: &[u8], pending: Vec<PendingText>) -> anyhow::Result<Vec<u8>> {
    let [r, g, b] = ACCENT_RGB;
    let mut operations = vec![Operation::new("rg", vec![r.into(), g.into(), b.into()])];

    for item in pending {
        operations.push(Operation::new("BMC", vec![Object::Name(MARK_TAG.to_vec())]));
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(font_name.to_vec()), item.size.into()],
        ));
        operations.push(Operation::new("Td", vec![(item.x as f32).into(), (item.y as f32).into()]));
        operations.push(Operation::new("Tj", vec![item.text]));
        operations.push(Operation::new("ET", vec![]));
        operations.push(Operation::new("EMC", vec![]));
    }

    Content { operations }.encode().context("Failed to encode annotation content")
}

/// Wraps existing page content in q/Q and appends the annotation after it.
fn append_isolated_content(
    doc: &mut Document,
    page_id: ObjectId,
    annotation: Vec<u8>,
) -> anyhow::Result<()> {
    let existing = doc.get_page_contents(page_id);

    let open_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));

    let mut body = b"Q\n".to_vec();
    body.extend_from_slice(&annotation);
    let mut stream = Stream::new(dictionary! {}, body);
    stream.compress().context("Failed to compress annotation content")?;
    let annotation_id = doc.add_object(stream);

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing.into_iter().map(Object::Reference));
    contents.push(Object::Reference(annotation_id));

    doc.get_dictionary_mut(page_id).context("Page dictionary missing")?.set("Contents", contents);
    Ok(())
}

/// Adds `font_id` to the page font resources under an unused name and returns that name.
fn register_font(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
) -> anyhow::Result<Vec<u8>> {
    let indirect_fonts = {
        let resources = page_resources_mut(doc, page_id)?;
        match resources.get(b"Font") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => {
                resources.set("Font", Dictionary::new());
                None
            }
        }
    };

    let fonts = match indirect_fonts {
        Some(id) => doc.get_dictionary_mut(id).context("Font resources missing")?,
        None => page_resources_mut(doc, page_id)?
            .get_mut(b"Font")
            .and_then(Object::as_dict_mut)
            .context("Font resources are not a dictionary")?,
    };

    let mut index = 0;
    let name = loop {
        let candidate = format!("GradeF{index}").into_bytes();
        if !fonts.has(&candidate) {
            break candidate;
        }
        index += 1;
    };
    fonts.set(name.clone(), Object::Reference(font_id));

    Ok(name)
}

/// Page-level resources, materialising inherited ones so the page keeps rendering as before.
fn page_resources_mut(doc: &mut Document, page_id: ObjectId) -> anyhow::Result<&mut Dictionary> {
    let page = doc.get_dictionary(page_id).context("Page dictionary missing")?;
    let indirect = match page.get(b"Resources") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(Object::Dictionary(_)) => None,
        _ => {
            let inherited = inherited_resources(doc, page_id);
            doc.get_dictionary_mut(page_id)
                .context("Page dictionary missing")?
                .set("Resources", inherited);
            None
        }
    };

    match indirect {
        Some(id) => doc.get_dictionary_mut(id).context("Page resources missing"),
        None => doc
            .get_dictionary_mut(page_id)
            .context("Page dictionary missing")?
            .get_mut(b"Resources")
            .and_then(Object::as_dict_mut)
            .context("Page resources are not a dictionary"),
    }
}

fn inherited_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Parent").and_then(Object::as_reference).ok());
    let mut depth = 0;

    while let Some(node_id) = current {
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };

        match node.get(b"Resources") {
            Ok(Object::Reference(id)) => {
                return doc.get_dictionary(*id).cloned().unwrap_or_default();
            }
            Ok(Object::Dictionary(dict)) => return dict.clone(),
            _ => {}
        }

        depth += 1;
        if depth > MAX_TREE_DEPTH {
            break;
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Dictionary::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::grading_delegate::BoundingBox;
    use crate::test_support;

    fn annotator(score_scale: ScoreScale) -> Annotator {
        Annotator::new(
            AnnotationFont::load(None).expect("font"),
            CoordinateOrigin::TopLeft,
            score_scale,
        )
    }

    fn detection(id: &str, y0: f64, is_correct: bool, points: f64) -> DetectionResult {
        DetectionResult {
            question_id: id.to_string(),
            bounding_box: BoundingBox { x0: 120.0, y0, x1: 400.0, y1: y0 + 30.0 },
            is_correct,
            points,
        }
    }

    #[test]
    fn total_counts_only_correct_answers() {
        let pdf = test_support::sample_pdf(595.0, 842.0);
        let detections =
            vec![detection("q1", 200.0, true, 5.0), detection("q2", 300.0, false, 3.0)];

        let annotated = annotator(ScoreScale::Fixed(20.0))
            .annotate(&pdf, &detections, 8.0)
            .expect("annotate");

        assert_eq!(annotated.total_score, 5.0);
        assert_eq!(annotated.marks, 5);
        assert_eq!(count_marks(&annotated.bytes).expect("count"), 5);
    }

    #[test]
    fn annotating_raw_twice_gives_same_mark_count_but_stacking_doubles_it() {
        let pdf = test_support::sample_pdf(595.0, 842.0);
        let detections = vec![detection("q1", 200.0, true, 5.0)];
        let annotator = annotator(ScoreScale::Fixed(20.0));

        let first = annotator.annotate(&pdf, &detections, 5.0).expect("first");
        let second = annotator.annotate(&pdf, &detections, 5.0).expect("second");
        let stacked = annotator.annotate(&first.bytes, &detections, 5.0).expect("stacked");

        assert_eq!(count_marks(&first.bytes).unwrap(), count_marks(&second.bytes).unwrap());
        assert_eq!(count_marks(&stacked.bytes).unwrap(), 2 * count_marks(&first.bytes).unwrap());
    }

    #[test]
    fn original_content_and_resources_survive() {
        let pdf = test_support::sample_pdf(595.0, 842.0);
        let annotated = annotator(ScoreScale::Fixed(20.0))
            .annotate(&pdf, &[detection("q1", 200.0, true, 2.0)], 2.0)
            .expect("annotate");

        let doc = Document::load_mem(&annotated.bytes).expect("load");
        let page_id = first_page(&doc).expect("page");
        let fonts = doc.get_page_fonts(page_id);
        assert!(fonts.contains_key(b"F1".as_slice()));
        assert!(fonts.contains_key(b"GradeF0".as_slice()));

        let content = doc.get_and_decode_page_content(page_id).expect("content");
        let operators: Vec<&str> =
            content.operations.iter().map(|operation| operation.operator.as_str()).collect();
        assert_eq!(operators.first(), Some(&"q"));
        let restore = operators.iter().position(|op| *op == "Q").expect("restore");
        let first_mark = operators.iter().position(|op| *op == "BMC").expect("mark");
        assert!(restore < first_mark);
    }

    /// Text positions of the tagged marks, in drawing order.
    fn mark_positions(pdf: &[u8]) -> Vec<(f32, f32)> {
        let doc = Document::load_mem(pdf).expect("load");
        let content =
            doc.get_and_decode_page_content(first_page(&doc).unwrap()).expect("content");
        let first_mark = content
            .operations
            .iter()
            .position(|operation| operation.operator == "BMC")
            .expect("mark");

        content.operations[first_mark..]
            .iter()
            .filter(|operation| operation.operator == "Td")
            .map(|operation| {
                let x = operation.operands[0].as_float().unwrap();
                let y = operation.operands[1].as_float().unwrap();
                (x, y)
            })
            .collect()
    }

    fn with_media_box(pdf: &[u8], media_box: [f32; 4]) -> Vec<u8> {
        let mut doc = Document::load_mem(pdf).expect("load");
        let page_id = first_page(&doc).unwrap();
        let rect: Vec<Object> = media_box.iter().map(|value| (*value).into()).collect();
        doc.get_dictionary_mut(page_id).unwrap().set("MediaBox", rect);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save");
        bytes
    }

    #[test]
    fn top_left_coordinates_are_flipped_against_the_media_box() {
        let pdf = test_support::sample_pdf(600.0, 800.0);
        let annotated = annotator(ScoreScale::Fixed(20.0))
            .annotate(&pdf, &[detection("q1", 200.0, true, 1.0)], 1.0)
            .expect("annotate");

        let positions = mark_positions(&annotated.bytes);

        assert_eq!(positions[0], (70.0, 600.0));
        assert_eq!(positions[1], (85.0, 600.0));
        assert_eq!(positions[2], (50.0, 700.0));
    }

    #[test]
    fn bottom_left_coordinates_are_offset_by_the_media_box_origin() {
        let pdf = test_support::sample_pdf(600.0, 800.0);
        let pdf = with_media_box(&pdf, [30.0, 40.0, 630.0, 840.0]);
        let annotator = Annotator::new(
            AnnotationFont::load(None).expect("font"),
            CoordinateOrigin::BottomLeft,
            ScoreScale::Fixed(20.0),
        );

        let annotated = annotator
            .annotate(&pdf, &[detection("q1", 200.0, true, 1.0)], 1.0)
            .expect("annotate");
        let positions = mark_positions(&annotated.bytes);

        assert_eq!(positions[0], (100.0, 240.0));
        assert_eq!(positions[1], (115.0, 240.0));
        assert_eq!(positions[2], (80.0, 740.0));
    }

    #[test]
    fn rubric_scale_uses_rubric_total_as_denominator() {
        assert_eq!(annotator(ScoreScale::RubricTotal).denominator(8.0), 8.0);
        assert_eq!(annotator(ScoreScale::Fixed(20.0)).denominator(8.0), 20.0);
    }

    #[test]
    fn annotation_works_on_normalized_images() {
        let pdf = crate::services::document::normalize_to_pdf(test_support::sample_png(300, 400))
            .expect("normalize");
        let annotated = annotator(ScoreScale::Fixed(20.0))
            .annotate(&pdf, &[detection("q1", 100.0, false, 4.0)], 4.0)
            .expect("annotate");

        assert_eq!(annotated.total_score, 0.0);
        assert_eq!(count_marks(&annotated.bytes).unwrap(), 3);
    }

    #[test]
    fn format_points_trims_integral_values() {
        assert_eq!(format_points(5.0), "5");
        assert_eq!(format_points(2.5), "2.5");
        assert_eq!(format_points(1.25), "1.25");
        assert_eq!(format_points(0.0), "0");
    }

    #[test]
    fn documents_without_pages_are_rejected() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let result = annotator(ScoreScale::Fixed(20.0)).annotate(&bytes, &[], 0.0);
        assert!(result.is_err());
    }
}
