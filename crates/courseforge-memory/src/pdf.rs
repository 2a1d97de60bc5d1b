use anyhow::Result;
use lopdf::Document;

/// Fragments at or below this length are treated as headers/footers and
/// dropped.
const MIN_PARAGRAPH_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct Paragraph {
    pub text: String,
    /// 1-based page number.
    pub page: u32,
    /// 0-based position within the page.
    pub paragraph_index: usize,
    pub word_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub paragraphs: Vec<Paragraph>,
    pub total_pages: usize,
}

/// Extracts ordered paragraph records with page metadata from raw PDF bytes.
pub fn extract_structured_content(data: &[u8]) -> Result<ExtractedContent> {
    let doc = Document::load_mem(data)?;
    let pages = doc.get_pages();
    let mut content = ExtractedContent {
        paragraphs: Vec::new(),
        total_pages: pages.len(),
    };

    for page_number in pages.keys() {
        let page_text = match doc.extract_text(&[*page_number]) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("failed to extract text from page {page_number}: {e}");
                continue;
            }
        };
        for (paragraph_index, text) in split_paragraphs(&page_text).into_iter().enumerate() {
            content.paragraphs.push(Paragraph {
                word_count: text.split_whitespace().count(),
                text,
                page: *page_number,
                paragraph_index,
            });
        }
    }

    Ok(content)
}

/// Splits page text into cleaned paragraphs: line endings normalized,
/// blank-line runs as separators, intra-paragraph newlines and space runs
/// collapsed to single spaces, short fragments dropped.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut paragraphs);

    paragraphs
}

fn flush_paragraph(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let joined = lines.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    lines.clear();
    if collapsed.len() > MIN_PARAGRAPH_LEN {
        out.push(collapsed);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const LONG_A: &str =
        "This first paragraph talks about ownership and it is comfortably long enough to keep.";
    const LONG_B: &str =
        "A second paragraph covering borrowing rules, also long enough to clear the filter.";

    #[test]
    fn splits_on_blank_line_runs() {
        let text = format!("{LONG_A}\n\n\n{LONG_B}");
        let paragraphs = split_paragraphs(&text);
        assert_eq!(paragraphs, vec![LONG_A.to_string(), LONG_B.to_string()]);
    }

    #[test]
    fn collapses_intra_paragraph_newlines_and_spaces() {
        let text = "This  line is broken\nacross   several\nlines but forms one single paragraph.";
        let paragraphs = split_paragraphs(text);
        assert_eq!(
            paragraphs,
            vec!["This line is broken across several lines but forms one single paragraph.".to_string()]
        );
    }

    #[test]
    fn drops_short_fragments() {
        let text = format!("Page 3\n\n{LONG_A}\n\nFooter");
        let paragraphs = split_paragraphs(&text);
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0], LONG_A);
    }

    #[test]
    fn handles_windows_line_endings() {
        let text = format!("{LONG_A}\r\n\r\n{LONG_B}\r\n");
        let paragraphs = split_paragraphs(&text);
        assert_eq!(paragraphs.len(), 2);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("   \n\n  ").is_empty());
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(extract_structured_content(b"definitely not a pdf").is_err());
    }

    #[test]
    fn extracts_paragraphs_from_generated_pdf() {
        let bytes = make_pdf(
            "Ownership is the core concept of the Rust memory model and this sentence is long.",
        );
        let content = extract_structured_content(&bytes).unwrap();
        assert_eq!(content.total_pages, 1);
        assert_eq!(content.paragraphs.len(), 1);
        assert_eq!(content.paragraphs[0].page, 1);
        assert_eq!(content.paragraphs[0].paragraph_index, 0);
        assert!(content.paragraphs[0].text.contains("Ownership"));
        assert!(content.paragraphs[0].word_count > 10);
    }

    /// Builds a minimal single-page PDF carrying `text`.
    pub(crate) fn make_pdf(text: &str) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content stream"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("serialize pdf");
        buffer
    }
}
