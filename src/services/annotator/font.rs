use std::collections::BTreeMap;
use std::path::Path;

use ab_glyph::{Font, FontArc, GlyphId};
use anyhow::Context;
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

static EMBEDDED_FONT: &[u8] = include_bytes!("../../../assets/DejaVuSans.ttf");

const BASE_FONT: &str = "AutograderSans";

/// Glyphs every annotation font must provide.
pub(super) const REQUIRED_CHARS: &[char] =
    &['\u{2713}', '\u{2718}', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', '/', '-'];

/// A TrueType font embedded into PDFs as a Type0 font with Identity-H encoding.
#[derive(Clone)]
pub(crate) struct AnnotationFont {
    font: FontArc,
}

impl std::fmt::Debug for AnnotationFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationFont").field("bytes", &self.font.font_data().len()).finish()
    }
}

impl AnnotationFont {
    pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let font = match path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read font {}", path.display()))?;
                FontArc::try_from_vec(bytes)
                    .with_context(|| format!("Invalid font file {}", path.display()))?
            }
            None => FontArc::try_from_slice(EMBEDDED_FONT).context("Invalid embedded font")?,
        };

        let font = Self { font };
        if let Some(missing) = REQUIRED_CHARS.iter().find(|ch| font.glyph(**ch).is_none()) {
            anyhow::bail!("annotation font has no glyph for {missing:?}");
        }

        Ok(font)
    }

    pub(crate) fn glyph(&self, ch: char) -> Option<u16> {
        match self.font.glyph_id(ch) {
            GlyphId(0) => None,
            GlyphId(id) => Some(id),
        }
    }

    fn units_per_em(&self) -> f32 {
        self.font.units_per_em().unwrap_or(1000.0)
    }

    /// Scales font units to the 1000-unit glyph space PDF expects.
    fn to_glyph_space(&self, value: f32) -> i64 {
        (value * 1000.0 / self.units_per_em()).round() as i64
    }

    fn advance(&self, glyph: u16) -> i64 {
        self.to_glyph_space(self.font.h_advance_unscaled(GlyphId(glyph)))
    }

    /// Glyph ids for `text` as a two-byte Identity-H string; unknown characters are dropped.
    pub(super) fn encode(&self, text: &str, used: &mut BTreeMap<u16, char>) -> Object {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for ch in text.chars() {
            if let Some(glyph) = self.glyph(ch) {
                used.entry(glyph).or_insert(ch);
                bytes.extend_from_slice(&glyph.to_be_bytes());
            }
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }

    /// Adds the font program and its dictionaries to `doc`, returning the Type0 font id.
    pub(super) fn embed(
        &self,
        doc: &mut Document,
        used: &BTreeMap<u16, char>,
    ) -> anyhow::Result<ObjectId> {
        let program = self.font.font_data().to_vec();
        let mut font_file = Stream::new(dictionary! { "Length1" => program.len() as i64 }, program);
        font_file.compress().context("Failed to compress font program")?;
        let font_file_id = doc.add_object(font_file);

        let ascent = self.to_glyph_space(self.font.ascent_unscaled());
        let descent = self.to_glyph_space(self.font.descent_unscaled());
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => BASE_FONT,
            "Flags" => 32,
            "FontBBox" => vec![0.into(), descent.into(), 1000.into(), ascent.into()],
            "ItalicAngle" => 0,
            "Ascent" => ascent,
            "Descent" => descent,
            "CapHeight" => ascent,
            "StemV" => 80,
            "FontFile2" => font_file_id,
        });

        let mut widths = Vec::with_capacity(used.len() * 2);
        for glyph in used.keys() {
            widths.push(Object::Integer(i64::from(*glyph)));
            widths.push(Object::Array(vec![Object::Integer(self.advance(*glyph))]));
        }

        let descendant_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => BASE_FONT,
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "CIDToGIDMap" => "Identity",
            "DW" => 1000,
            "W" => widths,
        });

        let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(used)));

        Ok(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => BASE_FONT,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![descendant_id.into()],
            "ToUnicode" => to_unicode_id,
        }))
    }
}

fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> Vec<u8> {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<(&u16, &char)> = used.iter().collect();
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (glyph, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String =
                ch.encode_utf16(&mut units).iter().map(|unit| format!("{unit:04X}")).collect();
            cmap.push_str(&format!("<{glyph:04X}> <{hex}>\n"));
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_font_covers_marks_and_digits() {
        let font = AnnotationFont::load(None).expect("font");
        assert!(font.glyph('\u{2713}').is_some());
        assert!(font.glyph('\u{2718}').is_some());
        assert!(font.glyph('\u{E000}').is_none());
    }

    #[test]
    fn missing_font_file_is_reported() {
        let err = AnnotationFont::load(Some(Path::new("/nonexistent/font.ttf")))
            .expect_err("missing file");
        assert!(err.to_string().contains("Failed to read font"));
    }

    #[test]
    fn encode_uses_two_bytes_per_glyph() {
        let font = AnnotationFont::load(None).expect("font");
        let mut used = BTreeMap::new();

        let encoded = font.encode("20/20", &mut used);

        match encoded {
            Object::String(bytes, StringFormat::Hexadecimal) => assert_eq!(bytes.len(), 10),
            other => panic!("unexpected object {other:?}"),
        }
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn cmap_maps_glyphs_back_to_unicode() {
        let mut used = BTreeMap::new();
        used.insert(0x0A11, '\u{2713}');
        let cmap = String::from_utf8(to_unicode_cmap(&used)).expect("utf8");
        assert!(cmap.contains("1 beginbfchar\n<0A11> <2713>\n"));
    }
}
