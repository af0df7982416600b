//! Plain-text extraction for uploaded documents.

use std::io::Read;

use super::KnowledgeError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_MSWORD: &str = "application/msword";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";

/// Maximum decompressed bytes read from a DOCX entry
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Whether `content_type` can be extracted
pub fn is_supported(content_type: &str) -> bool {
    matches!(
        base_type(content_type).as_str(),
        MIME_PDF | MIME_DOCX | MIME_MSWORD | MIME_TEXT | MIME_MARKDOWN | MIME_HTML
    )
}

/// `text/html; charset=utf-8` → `text/html`
fn base_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extract UTF-8 text from `bytes` according to `content_type`
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, KnowledgeError> {
    match base_type(content_type).as_str() {
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MIME_HTML => Ok(html_to_text(&String::from_utf8_lossy(bytes))),
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| KnowledgeError::Extraction(format!("PDF: {}", e))),
        MIME_DOCX | MIME_MSWORD => extract_docx(bytes),
        other => Err(KnowledgeError::UnsupportedType(other.to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, KnowledgeError> {
    let ooxml = |e: &dyn std::fmt::Display| KnowledgeError::Extraction(format!("DOCX: {}", e));

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml(&e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ooxml(&e))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ooxml(&e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml(&"word/document.xml exceeds size limit"));
    }
    docx_text(&xml).map_err(|e| ooxml(&e))
}

/// Text of `w:t` runs; each `w:p` paragraph ends a line
fn docx_text(xml: &[u8]) -> Result<String, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(&t.unescape().unwrap_or_default());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Visible text of an HTML page: no tags, scripts or styles; common entities decoded
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let lower = html.to_ascii_lowercase();
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];
        if rest.starts_with('<') {
            let lower_rest = &lower[i..];
            let skip_until = if lower_rest.starts_with("<script") {
                Some("</script>")
            } else if lower_rest.starts_with("<style") {
                Some("</style>")
            } else {
                None
            };
            if let Some(closing) = skip_until {
                i = lower_rest
                    .find(closing)
                    .map(|p| i + p + closing.len())
                    .unwrap_or(html.len());
                continue;
            }

            let tag_end = rest.find('>').map(|p| i + p + 1).unwrap_or(html.len());
            let tag = &lower[i..tag_end];
            if ["<br", "<p", "</p", "<div", "</div", "<li", "<h", "</h", "<tr"]
                .iter()
                .any(|t| tag.starts_with(t))
            {
                out.push('\n');
            }
            i = tag_end;
            continue;
        }

        let next_tag = rest.find('<').map(|p| i + p).unwrap_or(html.len());
        out.push_str(&decode_entities(&html[i..next_tag]));
        i = next_tag;
    }

    collapse_whitespace(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Trim each line, collapse inner runs of spaces, drop blank lines
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
