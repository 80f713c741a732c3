//! Text extraction from uploaded books
//!
//! Produces UTF-8 plain text plus chapter boundaries (character offsets into
//! the text). All functions here are blocking; callers run them on the
//! blocking thread pool.

use std::path::Path;
use std::sync::OnceLock;

use chardetng::EncodingDetector;
use epub::doc::{EpubDoc, NavPoint};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const MIME_EPUB: &str = "application/epub+zip";
pub const MIME_TXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";

/// Content types accepted for upload
pub const SUPPORTED_MIME_TYPES: &[&str] = &[MIME_EPUB, MIME_TXT, MIME_PDF];

/// Extraction failures; the message is shown to the user
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported content type: {0}")]
    Unsupported(String),

    #[error("Could not read book file: {0}")]
    Io(#[from] std::io::Error),

    #[error("EPUB extraction failed: {0}")]
    Epub(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("No text could be extracted from the file")]
    Empty,
}

/// Chapter boundary within the extracted text (character offsets)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_pos: i64,
    pub end_pos: i64,
}

/// Extracted book content
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub text: String,
    pub chapters: Vec<Chapter>,
    /// Metadata title, when the format carries one
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Lowercase a Content-Type value and drop parameters (`; charset=...`)
pub fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guess a supported content type from a file extension
pub fn mime_from_file_name(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "epub" => Some(MIME_EPUB),
        "txt" => Some(MIME_TXT),
        "pdf" => Some(MIME_PDF),
        _ => None,
    }
}

/// The canonical supported type equal to `mime`, if any
pub fn supported_mime(mime: &str) -> Option<&'static str> {
    SUPPORTED_MIME_TYPES.iter().copied().find(|supported| *supported == mime)
}

/// Extract text from a stored book file
pub fn extract_file(path: &Path, mime: &str) -> Result<Extracted, ExtractError> {
    let extracted = match mime {
        MIME_TXT => {
            let bytes = std::fs::read(path)?;
            let text = normalize_newlines(&decode_text(&bytes));
            let chapters = detect_text_chapters(&text);
            Extracted {
                text,
                chapters,
                ..Default::default()
            }
        }
        MIME_EPUB => extract_epub(path)?,
        MIME_PDF => {
            let bytes = std::fs::read(path)?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()))?;
            Extracted {
                text: normalize_newlines(&text),
                ..Default::default()
            }
        }
        other => return Err(ExtractError::Unsupported(other.to_string())),
    };

    if extracted.text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    Ok(extracted)
}

/// Decode bytes of unknown encoding to UTF-8
///
/// A byte order mark wins; otherwise chardetng guesses (this covers
/// Shift_JIS and EUC-JP as well as UTF-8).
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (decoded, _, _) = encoding.decode(&bytes[bom_len..]);
        return decoded.into_owned();
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Decoding as {} replaced malformed sequences", encoding.name());
    } else {
        debug!("Decoded text as {}", encoding.name());
    }
    decoded.into_owned()
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn chapter_heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ \t　]*(第[0-9０-９零〇一二三四五六七八九十百千]+[章話回節部巻][^\n]{0,40}|プロローグ|エピローグ)[ \t　]*$")
            .expect("chapter heading pattern is valid")
    })
}

/// Find chapter headings (第一章, 第3話, プロローグ, ...) in plain text
fn detect_text_chapters(text: &str) -> Vec<Chapter> {
    let re = chapter_heading_regex();
    let mut headings: Vec<(i64, String)> = Vec::new();
    let mut pos: i64 = 0;

    for line in text.split('\n') {
        if re.is_match(line) {
            headings.push((pos, line.trim().to_string()));
        }
        pos += line.chars().count() as i64 + 1;
    }

    let total = text.chars().count() as i64;
    let mut chapters = Vec::with_capacity(headings.len());
    for (i, (start, title)) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map(|(next, _)| *next).unwrap_or(total);
        chapters.push(Chapter {
            title: title.clone(),
            start_pos: *start,
            end_pos: end,
        });
    }
    chapters
}

fn extract_epub(path: &Path) -> Result<Extracted, ExtractError> {
    let mut doc = EpubDoc::new(path).map_err(|e| ExtractError::Epub(e.to_string()))?;

    let title = doc.mdata("title").map(|m| m.value.clone());
    let author = doc.mdata("creator").map(|m| m.value.clone());

    let mut toc = Vec::new();
    flatten_toc(&doc.toc, &mut toc);

    let total = doc.get_num_chapters();
    let mut text = String::new();
    let mut pos: i64 = 0;
    let mut chapters = Vec::new();

    for index in 0..total {
        if !doc.set_current_page(index) {
            return Err(ExtractError::Epub(format!("cannot open spine item {}", index)));
        }

        let section_path = doc
            .get_current_path()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let bytes = doc
            .get_current_with_epub_uris()
            .map_err(|e| ExtractError::Epub(format!("spine item {}: {}", index, e)))?;
        let section = html_to_text(&String::from_utf8_lossy(&bytes));
        if section.is_empty() {
            continue;
        }

        if !text.is_empty() {
            text.push_str("\n\n");
            pos += 2;
        }
        let len = section.chars().count() as i64;
        text.push_str(&section);

        let chapter_title = toc
            .iter()
            .find(|(target, _)| same_document(target, &section_path))
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| format!("Chapter {}", chapters.len() + 1));

        chapters.push(Chapter {
            title: chapter_title,
            start_pos: pos,
            end_pos: pos + len,
        });
        pos += len;
    }

    Ok(Extracted {
        text,
        chapters,
        title,
        author,
    })
}

fn flatten_toc(points: &[NavPoint], out: &mut Vec<(String, String)>) {
    for point in points {
        let target = point.content.to_string_lossy().to_string();
        let target = target.split('#').next().unwrap_or_default().to_string();
        if !point.label.trim().is_empty() {
            out.push((target, point.label.trim().to_string()));
        }
        flatten_toc(&point.children, out);
    }
}

/// TOC targets and spine paths may differ in their directory prefix
fn same_document(toc_target: &str, spine_path: &str) -> bool {
    !toc_target.is_empty()
        && !spine_path.is_empty()
        && (toc_target == spine_path
            || spine_path.ends_with(&format!("/{}", toc_target))
            || toc_target.ends_with(&format!("/{}", spine_path)))
}

struct MarkupPatterns {
    hidden: Regex,
    ruby_annotation: Regex,
    block_break: Regex,
    tag: Regex,
    blank_lines: Regex,
}

fn markup_patterns() -> &'static MarkupPatterns {
    static PATTERNS: OnceLock<MarkupPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("markup pattern is valid");
        MarkupPatterns {
            hidden: compile(r"(?is)<(head|script|style)[^>]*>.*?</(head|script|style)>"),
            // furigana would otherwise be duplicated inline
            ruby_annotation: compile(r"(?is)<(rt|rp)[^>]*>.*?</(rt|rp)>"),
            block_break: compile(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr|blockquote|section)\s*>"),
            tag: compile(r"(?s)<[^>]*>"),
            blank_lines: compile(r"\n{3,}"),
        }
    })
}

/// Strip XHTML markup down to readable text
pub fn html_to_text(html: &str) -> String {
    let p = markup_patterns();

    let text = p.hidden.replace_all(html, "");
    let text = p.ruby_annotation.replace_all(&text, "");
    let text = p.block_break.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);

    let lines: Vec<&str> = text.lines().map(|line| line.trim()).collect();
    let joined = lines.join("\n");
    p.blank_lines.replace_all(&joined, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_mime() {
        assert_eq!(normalize_mime("text/plain; charset=utf-8"), "text/plain");
        assert_eq!(normalize_mime("Application/PDF"), "application/pdf");
        assert_eq!(normalize_mime(""), "");
    }

    #[test]
    fn test_mime_from_file_name() {
        assert_eq!(mime_from_file_name("kokoro.EPUB"), Some(MIME_EPUB));
        assert_eq!(mime_from_file_name("notes.txt"), Some(MIME_TXT));
        assert_eq!(mime_from_file_name("paper.pdf"), Some(MIME_PDF));
        assert_eq!(mime_from_file_name("image.png"), None);
        assert_eq!(mime_from_file_name("README"), None);
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode_text("吾輩は猫である".as_bytes()), "吾輩は猫である");
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("こんにちは".as_bytes());
        assert_eq!(decode_text(&bytes), "こんにちは");
    }

    #[test]
    fn test_decode_shift_jis() {
        let source = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。";
        let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(source);
        assert_eq!(decode_text(&encoded), source);
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>x</title><style>p{}</style></head>
            <body><h1>第一章</h1><p>吾輩は<ruby>猫<rp>(</rp><rt>ねこ</rt><rp>)</rp></ruby>である。</p>
            <p>A &amp; B&nbsp;&lt;C&gt;</p></body></html>"#;
        let text = html_to_text(html);
        assert_eq!(text, "第一章\n吾輩は猫である。\n\nA & B\u{a0}<C>");
    }

    #[test]
    fn test_text_chapters_detected() {
        let text = "前書き\n第一章 出会い\n本文一\n第二章\n本文二";
        let chapters = detect_text_chapters(text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "第一章 出会い");
        assert_eq!(chapters[0].start_pos, 4);
        assert_eq!(chapters[0].end_pos, chapters[1].start_pos);
        assert_eq!(chapters[1].end_pos, text.chars().count() as i64);
    }

    #[test]
    fn test_extract_txt_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all("一行目\r\n二行目".as_bytes()).unwrap();

        let extracted = extract_file(file.path(), MIME_TXT).unwrap();
        assert_eq!(extracted.text, "一行目\n二行目");
        assert!(extracted.chapters.is_empty());
    }

    #[test]
    fn test_extract_empty_txt_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"   \n").unwrap();
        assert!(matches!(extract_file(file.path(), MIME_TXT), Err(ExtractError::Empty)));
    }

    #[test]
    fn test_extract_corrupt_epub_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a zip archive").unwrap();
        assert!(matches!(extract_file(file.path(), MIME_EPUB), Err(ExtractError::Epub(_))));
    }

    #[test]
    fn test_unsupported_mime() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            extract_file(file.path(), "image/png"),
            Err(ExtractError::Unsupported(_))
        ));
    }

    #[test]
    fn test_same_document() {
        assert!(same_document("Text/ch1.xhtml", "OEBPS/Text/ch1.xhtml"));
        assert!(same_document("OEBPS/ch1.xhtml", "OEBPS/ch1.xhtml"));
        assert!(!same_document("ch1.xhtml", "OEBPS/ch10.xhtml"));
        assert!(!same_document("", "OEBPS/ch1.xhtml"));
    }
}
