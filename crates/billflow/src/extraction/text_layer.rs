use std::sync::Arc;

use crate::config::schema::DocumentFormat;
use crate::error::ExtractionError;

use super::{ExtractionStrategy, FieldExtractor, RawExtraction};

/// Field confidence multiplier for text read straight from the PDF.
const TEXT_LAYER_BASE_CONFIDENCE: f64 = 1.0;

/// Fast path: reads the embedded text layer of a PDF with lopdf.
pub struct TextLayerStrategy {
    fields: Arc<FieldExtractor>,
}

impl TextLayerStrategy {
    pub fn new(fields: Arc<FieldExtractor>) -> Self {
        Self { fields }
    }
}

impl ExtractionStrategy for TextLayerStrategy {
    fn name(&self) -> &'static str {
        "text-layer"
    }

    fn extract_raw(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<RawExtraction, ExtractionError> {
        let _span = tracing::info_span!("extraction.text_layer").entered();

        if format.is_image() {
            return Err(ExtractionError::Unsupported(format.to_string()));
        }

        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        let text = extract_text_from_pdf(&doc);
        tracing::debug!(chars = text.len(), "Text layer extracted");

        Ok(self.fields.extract(&text, TEXT_LAYER_BASE_CONFIDENCE))
    }
}

/// Concatenates the text of every page. Pages lopdf cannot decode are
/// skipped.
pub(crate) fn extract_text_from_pdf(doc: &lopdf::Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => tracing::debug!(page = page_num, error = %e, "Skipping undecodable page"),
        }
    }

    text
}
