use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use image::{imageops, DynamicImage, GrayImage, ImageFormat};

use crate::config::schema::{DocumentFormat, OcrConfig};
use crate::error::ExtractionError;

use super::{ExtractionStrategy, FieldExtractor, RawExtraction};

/// Field confidence multiplier for recognised text.
const OCR_BASE_CONFIDENCE: f64 = 0.9;

/// Images narrower than this are upscaled before recognition.
const MIN_OCR_WIDTH: u32 = 1000;

/// Fallback path: renders pages to images, enhances them and runs Tesseract.
#[derive(Clone)]
pub struct OcrStrategy {
    inner: Arc<OcrStrategyInner>,
}

struct OcrStrategyInner {
    fields: Arc<FieldExtractor>,
    languages: String,
    dpi: u32,
}

impl OcrStrategy {
    pub fn new(fields: Arc<FieldExtractor>, config: &OcrConfig) -> Self {
        let languages = if config.languages.is_empty() {
            "eng".to_string()
        } else {
            config.languages.join("+")
        };

        Self {
            inner: Arc::new(OcrStrategyInner {
                fields,
                languages,
                dpi: config.dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    pub fn languages(&self) -> &str {
        &self.inner.languages
    }

    fn ocr_pdf(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        let page_count = match lopdf::Document::load_mem(pdf_bytes) {
            Ok(doc) => doc.get_pages().len(),
            Err(e) => {
                tracing::warn!(error = %e, "lopdf could not parse PDF, asking pdfinfo for page count");
                count_pdf_pages(pdf_bytes)?
            }
        };

        let mut all_text = String::new();
        let mut last_error = None;

        for page_num in 1..=page_count {
            let page = render_pdf_page_to_image(pdf_bytes, page_num as u32, self.dpi())
                .and_then(|image_data| self.ocr_image(&image_data));
            match page {
                Ok(page_text) => {
                    all_text.push_str(&page_text);
                    all_text.push('\n');
                }
                Err(e) => {
                    tracing::debug!(page = page_num, error = %e, "OCR of page failed");
                    last_error = Some(e);
                }
            }
        }

        // Only an error when no page could be read at all.
        match last_error {
            Some(e) if all_text.trim().is_empty() => Err(e),
            _ => Ok(all_text),
        }
    }

    fn ocr_image(&self, image_data: &[u8]) -> Result<String, ExtractionError> {
        let png = enhance_image(image_data)?;
        recognize(&png, &self.inner.languages)
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn extract_raw(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<RawExtraction, ExtractionError> {
        let _span = tracing::info_span!("extraction.ocr", format = %format).entered();

        let text = if format.is_image() {
            self.ocr_image(bytes)?
        } else {
            self.ocr_pdf(bytes)?
        };
        tracing::debug!(chars = text.len(), "OCR text extracted");

        Ok(self.inner.fields.extract(&text, OCR_BASE_CONFIDENCE))
    }
}

/// Grayscale, contrast stretch and upscaling of small scans. Returns PNG
/// bytes ready for Tesseract.
pub fn enhance_image(image_data: &[u8]) -> Result<Vec<u8>, ExtractionError> {
    let img = image::load_from_memory(image_data)
        .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to load image: {}", e)))?;

    let mut gray = img.to_luma8();
    stretch_contrast(&mut gray);

    let (width, height) = gray.dimensions();
    if width > 0 && width < MIN_OCR_WIDTH {
        let factor = MIN_OCR_WIDTH.div_ceil(width).min(4);
        gray = imageops::resize(
            &gray,
            width * factor,
            height * factor,
            imageops::FilterType::CatmullRom,
        );
    }

    let mut png_data = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to encode image: {}", e)))?;

    Ok(png_data)
}

/// Linearly maps the darkest pixel to black and the brightest to white.
fn stretch_contrast(gray: &mut GrayImage) {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max <= min {
        return;
    }

    let range = (max - min) as u32;
    for pixel in gray.pixels_mut() {
        pixel[0] = ((pixel[0] - min) as u32 * 255 / range) as u8;
    }
}

#[cfg(feature = "ocr")]
fn recognize(png_data: &[u8], languages: &str) -> Result<String, ExtractionError> {
    let mut lt = leptess::LepTess::new(None, languages).map_err(|e| {
        ExtractionError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
    })?;

    lt.set_image_from_mem(png_data)
        .map_err(|e| ExtractionError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

    lt.get_utf8_text()
        .map_err(|e| ExtractionError::OcrFailed(format!("OCR failed: {}", e)))
}

/// Without the `ocr` feature the tesseract binary is used instead of the
/// linked library.
#[cfg(not(feature = "ocr"))]
fn recognize(png_data: &[u8], languages: &str) -> Result<String, ExtractionError> {
    let image_path = std::env::temp_dir().join(format!("billflow_ocr_{}.png", uuid::Uuid::new_v4()));
    std::fs::write(&image_path, png_data)
        .map_err(|e| ExtractionError::OcrFailed(format!("Failed to write temp image: {}", e)))?;

    let output = Command::new("tesseract")
        .arg(&image_path)
        .args(["stdout", "-l", languages])
        .output();

    let _ = std::fs::remove_file(&image_path);

    let output = output.map_err(|e| {
        ExtractionError::OcrFailed(format!(
            "Failed to run tesseract: {}. Make sure tesseract-ocr is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(ExtractionError::OcrFailed(format!(
            "tesseract failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Page count from pdfinfo (poppler-utils), for PDFs lopdf cannot parse.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
    let pdf_path = std::env::temp_dir().join(format!("billflow_pagecount_{}.pdf", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdfinfo").arg(&pdf_path).output();
    let _ = std::fs::remove_file(&pdf_path);

    let output = output.map_err(|e| {
        ExtractionError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(ExtractionError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_page_count(&stdout).unwrap_or(1))
}

fn parse_page_count(pdfinfo_output: &str) -> Option<usize> {
    pdfinfo_output
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ExtractionError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("billflow_render_{}.pdf", uuid::Uuid::new_v4()));
    let output_prefix = temp_dir.join(format!("billflow_page_{}", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractionError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let page = page_num.to_string();
    let output = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string(), "-f", &page, "-l", &page])
        .arg(&pdf_path)
        .arg(&output_prefix)
        .output();

    let _ = std::fs::remove_file(&pdf_path);

    let output = output.map_err(|e| {
        ExtractionError::PdfProcessing(format!(
            "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(ExtractionError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm zero-pads the page suffix depending on the page count.
    let prefix = output_prefix.display().to_string();
    let candidates = [
        format!("{}-{}.png", prefix, page_num),
        format!("{}-{:02}.png", prefix, page_num),
        format!("{}-{:03}.png", prefix, page_num),
    ];
    let image_path = candidates
        .iter()
        .find(|p| Path::new(p).exists())
        .ok_or_else(|| {
            ExtractionError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ExtractionError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;
    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
