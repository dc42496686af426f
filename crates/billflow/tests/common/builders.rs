//! Builders for test configuration and extraction inputs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;

use billflow::config::schema::{Config, DocumentFormat};
use billflow::error::ExtractionError;
use billflow::extraction::{ExtractionStrategy, RawExtraction};

/// Builder for `Config` instances with OCR switched off.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.worker_count = 2;
        config.extraction.ocr.enabled = false;
        Self { config }
    }

    pub fn auto_approve_max_amount(mut self, amount: i64) -> Self {
        self.config.routing.auto_approve_max_amount = Decimal::from(amount);
        self
    }

    pub fn auto_approve_min_confidence(mut self, confidence: f64) -> Self {
        self.config.routing.auto_approve_min_confidence = confidence;
        self
    }

    pub fn manual_review_min_confidence(mut self, confidence: f64) -> Self {
        self.config.routing.manual_review_min_confidence = confidence;
        self
    }

    pub fn token_ttl_secs(mut self, secs: u64) -> Self {
        self.config.review.token_ttl_secs = secs;
        self
    }

    pub fn quality_threshold(mut self, threshold: f64) -> Self {
        self.config.extraction.quality_threshold = threshold;
        self
    }

    pub fn max_document_bytes(mut self, bytes: u64) -> Self {
        self.config.extraction.max_document_bytes = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Strategy that reports fixed fields and text, and counts its calls.
pub struct FixedStrategy {
    name: &'static str,
    text: String,
    fields: Vec<(String, String)>,
    confidence: f64,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedStrategy {
    pub fn new(name: &'static str, fields: Vec<(String, String)>, confidence: f64) -> Self {
        Self {
            name,
            text: "Invoice total vendor amount".to_string(),
            fields,
            confidence,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Vec::new(), 0.0)
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ExtractionStrategy for FixedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract_raw(
        &self,
        _bytes: &[u8],
        _format: DocumentFormat,
    ) -> Result<RawExtraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractionError::PdfProcessing("stub failure".to_string()));
        }

        let mut raw = RawExtraction {
            text: self.text.clone(),
            ..RawExtraction::default()
        };
        for (name, value) in &self.fields {
            raw.fields.insert(name.clone(), value.clone());
            raw.field_confidence.insert(name.clone(), self.confidence);
        }
        Ok(raw)
    }
}

pub fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Every field the default rules look at, with the given total.
pub fn complete_invoice(total: &str) -> Vec<(String, String)> {
    fields(&[
        ("invoice_number", "INV-0042"),
        ("vendor", "ACME GmbH"),
        ("date", "2024-03-01"),
        ("total", total),
        ("currency", "EUR"),
    ])
}

/// Smallest byte string that passes the PDF signature check.
pub const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n%%EOF";

/// Builds a single-page PDF whose text layer holds `lines`.
pub fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }),
    );

    let mut content = String::new();
    for (i, line) in lines.iter().enumerate() {
        content.push_str(&format!(
            "BT /F1 11 Tf 60 {} Td ({}) Tj ET\n",
            740 - 16 * i,
            line
        ));
    }
    doc.objects.insert(
        content_id,
        Object::Stream(Stream::new(dictionary! {}, content.into_bytes())),
    );

    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
            "Contents" => content_id,
        }),
    );

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to serialize test PDF");
    bytes
}
