use std::path::Path;
use std::io::Read;
use anyhow::{Result, Context};
use super::walker::SupportedFormat;

/// Text of one page (PDF) or of a whole document (other formats).
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: Option<usize>,
    pub text: String,
}

impl PageText {
    fn whole(text: String) -> Vec<Self> {
        vec![Self { page: None, text }]
    }
}

pub fn extract_pages(path: &Path, format: SupportedFormat) -> Result<Vec<PageText>> {
    let pages = match format {
        SupportedFormat::Pdf => extract_pdf(path)?,
        SupportedFormat::PlainText => PageText::whole(extract_plain_text(path)?),
        SupportedFormat::Docx => PageText::whole(extract_docx(path)?),
        SupportedFormat::Xlsx => PageText::whole(extract_xlsx(path)?),
        SupportedFormat::Pptx => PageText::whole(extract_pptx(path)?),
    };

    Ok(pages.into_iter().filter(|p| !p.text.trim().is_empty()).collect())
}

fn extract_plain_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))
}

fn extract_pdf(path: &Path) -> Result<Vec<PageText>> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText { page: Some(i + 1), text })
        .collect())
}

fn extract_docx(path: &Path) -> Result<String> {
    let mut archive = open_zip(path, "DOCX")?;

    let mut xml_content = String::new();
    if let Ok(mut entry) = archive.by_name("word/document.xml") {
        entry.read_to_string(&mut xml_content)?;
    } else {
        anyhow::bail!("No word/document.xml found in DOCX");
    }

    Ok(extract_text_from_xml(&xml_content, "w:t"))
}

fn extract_xlsx(path: &Path) -> Result<String> {
    use calamine::{Reader, open_workbook, Xlsx};

    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open XLSX: {}", path.display()))?;

    let mut all_text = Vec::new();
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for sheet_name in sheet_names {
        if let Ok(range) = workbook.worksheet_range(&sheet_name) {
            for row in range.rows() {
                let row_text: Vec<String> = row.iter()
                    .map(|cell| cell.to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if !row_text.is_empty() {
                    all_text.push(row_text.join("\t"));
                }
            }
        }
    }

    Ok(all_text.join("\n"))
}

fn extract_pptx(path: &Path) -> Result<String> {
    let mut archive = open_zip(path, "PPTX")?;

    let mut slides: Vec<(usize, String)> = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        if let Some(number) = slide_number(&name) {
            let mut xml_content = String::new();
            entry.read_to_string(&mut xml_content)?;
            let text = extract_text_from_xml(&xml_content, "a:t");
            if !text.is_empty() {
                slides.push((number, text));
            }
        }
    }

    // Archive order is not slide order.
    slides.sort_by_key(|(number, _)| *number);
    Ok(slides.into_iter().map(|(_, text)| text).collect::<Vec<_>>().join("\n\n"))
}

fn open_zip(path: &Path, kind: &str) -> Result<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}: {}", kind, path.display()))?;
    zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read {} as ZIP: {}", kind, path.display()))
}

fn slide_number(entry_name: &str) -> Option<usize> {
    entry_name
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

fn extract_text_from_xml(xml: &str, tag: &str) -> String {
    let open_tag = format!("<{}", tag);
    let close_tag = format!("</{}>", tag);
    let mut texts = Vec::new();
    let mut search_from = 0;

    while let Some(open_pos) = xml[search_from..].find(&open_tag) {
        let abs_open = search_from + open_pos;
        let after_name = abs_open + open_tag.len();

        // `<a:t>` must not match `<a:tbl>` and friends.
        match xml[after_name..].chars().next() {
            Some('>') | Some(' ') => {}
            _ => {
                search_from = after_name;
                continue;
            }
        }

        let Some(tag_end) = xml[abs_open..].find('>') else { break };
        let content_start = abs_open + tag_end + 1;
        let Some(close_pos) = xml[content_start..].find(&close_tag) else { break };

        let content = &xml[content_start..content_start + close_pos];
        if !content.is_empty() {
            texts.push(unescape_xml(content));
        }
        search_from = content_start + close_pos + close_tag.len();
    }

    texts.join(" ")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
