//! Plain-text extraction for the supported source formats.
//!
//! The loader supplies raw bytes plus the [`SourceType`] chosen from the file
//! extension; this module returns UTF-8 text. Extraction never panics: a
//! failure is returned and the loader skips the file.

use crate::models::SourceType;

/// Extraction failure for a single file.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid UTF-8 at byte offset {valid_up_to}")]
    Decode { valid_up_to: usize },

    #[error("{0}")]
    Pdf(String),
}

/// Extract plain text from file bytes according to `source_type`.
pub fn extract_text(bytes: &[u8], source_type: SourceType) -> Result<String, ExtractError> {
    match source_type {
        SourceType::Pdf => extract_pdf(bytes),
        SourceType::Txt | SourceType::Md => decode_utf8(bytes),
    }
}

/// Strict UTF-8 decoding; invalid sequences are an error, never replaced.
fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| ExtractError::Decode {
            valid_up_to: e.valid_up_to(),
        })
}

/// Page-by-page PDF extraction, pages joined with `\n`.
///
/// pdf-extract handles the common case in one pass. When it rejects the
/// document, fall back to lopdf one page at a time so a single broken page
/// does not lose the rest of the file.
fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    match pdf_extract::extract_text_from_mem_by_pages(bytes) {
        Ok(pages) => Ok(join_pages(&pages)),
        Err(e) => {
            tracing::debug!(error = %e, "pdf-extract failed, retrying page by page");
            extract_pdf_per_page(bytes)
        }
    }
}

fn extract_pdf_per_page(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = Vec::new();
    let mut failed = 0usize;
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                tracing::warn!(page = page_number, error = %e, "skipping unreadable PDF page");
                failed += 1;
            }
        }
    }

    if pages.is_empty() && failed > 0 {
        return Err(ExtractError::Pdf(format!(
            "none of {} pages could be read",
            failed
        )));
    }
    Ok(join_pages(&pages))
}

fn join_pages(pages: &[String]) -> String {
    pages.join("\n").trim().to_string()
}
