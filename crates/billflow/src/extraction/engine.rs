use std::sync::Arc;

use tracing::Instrument;

use crate::config::schema::{DocumentFormat, ExtractionConfig};
use crate::document::{check_bytes, Document};
use crate::error::{ConfigError, ExtractionError, InputError};

use super::quality;
use super::{
    ExtractionMethod, ExtractionResult, ExtractionStrategy, FieldExtractor, OcrStrategy,
    RawExtraction, TextLayerStrategy,
};

/// Thresholds the orchestration works with.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_document_bytes: u64,
    pub quality_threshold: f64,
    pub hybrid_penalty: f64,
    pub keywords: Vec<String>,
}

impl EngineSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_document_bytes: config.max_document_bytes,
            quality_threshold: config.quality_threshold,
            hybrid_penalty: config.hybrid_penalty,
            keywords: config.keywords.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

/// Runs the fast strategy, and the fallback only when the fast result is
/// not good enough.
#[derive(Clone)]
pub struct ExtractionEngine {
    fast: Arc<dyn ExtractionStrategy>,
    fallback: Option<Arc<dyn ExtractionStrategy>>,
    settings: Arc<EngineSettings>,
}

/// Outcome of running one strategy.
struct Attempt {
    strategy: &'static str,
    raw: Option<RawExtraction>,
    quality: f64,
    error: Option<String>,
}

impl Attempt {
    fn note(&self) -> String {
        match &self.error {
            Some(err) => format!("{} failed: {}", self.strategy, err),
            None => format!("{} quality {:.2}", self.strategy, self.quality),
        }
    }
}

impl ExtractionEngine {
    pub fn new(
        fast: Arc<dyn ExtractionStrategy>,
        fallback: Option<Arc<dyn ExtractionStrategy>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            fast,
            fallback,
            settings: Arc::new(settings),
        }
    }

    /// Text layer first, OCR as fallback unless disabled.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        let fields = Arc::new(FieldExtractor::new(&config.fields)?);

        let fast: Arc<dyn ExtractionStrategy> = Arc::new(TextLayerStrategy::new(fields.clone()));
        let fallback: Option<Arc<dyn ExtractionStrategy>> = if config.ocr.enabled {
            Some(Arc::new(OcrStrategy::new(fields, &config.ocr)))
        } else {
            None
        };

        Ok(Self::new(fast, fallback, EngineSettings::from_config(config)))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Extracts fields from `document`.
    ///
    /// Only input problems are errors. Anything that goes wrong inside a
    /// strategy lowers the confidence of the returned result instead.
    pub async fn extract(&self, document: &Document) -> Result<ExtractionResult, InputError> {
        let span = tracing::info_span!(
            "extract",
            document_id = %document.id(),
            format = %document.format()
        );
        self.extract_inner(document).instrument(span).await
    }

    async fn extract_inner(&self, document: &Document) -> Result<ExtractionResult, InputError> {
        let format = check_bytes(document.bytes(), self.settings.max_document_bytes)?;

        let fast = self.run(&self.fast, document, format).await;
        tracing::debug!(strategy = fast.strategy, quality = fast.quality, "Fast path finished");

        if fast.raw.is_some() && fast.quality >= self.settings.quality_threshold {
            let notes = vec![fast.note()];
            return Ok(self.settle(fast, ExtractionMethod::FastPath, 1.0, notes));
        }

        let Some(fallback_strategy) = &self.fallback else {
            tracing::info!(
                quality = fast.quality,
                "Fast path below threshold and no fallback configured"
            );
            let notes = vec![fast.note(), "fallback disabled".to_string()];
            return Ok(self.hybrid(vec![fast], notes));
        };

        let fallback = self.run(fallback_strategy, document, format).await;
        tracing::debug!(
            strategy = fallback.strategy,
            quality = fallback.quality,
            "Fallback finished"
        );

        let notes = vec![fast.note(), fallback.note()];
        if fallback.raw.is_some() && fallback.quality > fast.quality {
            return Ok(self.settle(fallback, ExtractionMethod::Fallback, 1.0, notes));
        }

        Ok(self.hybrid(vec![fast, fallback], notes))
    }

    /// Best of the attempts, discounted; or a failed result when none
    /// produced anything.
    fn hybrid(&self, attempts: Vec<Attempt>, notes: Vec<String>) -> ExtractionResult {
        let best = attempts
            .into_iter()
            .filter(|a| a.raw.is_some())
            .max_by(|a, b| a.quality.total_cmp(&b.quality));

        match best {
            Some(attempt) => {
                tracing::info!(
                    strategy = attempt.strategy,
                    quality = attempt.quality,
                    "Returning hybrid result"
                );
                self.settle(
                    attempt,
                    ExtractionMethod::Hybrid,
                    self.settings.hybrid_penalty,
                    notes,
                )
            }
            None => {
                tracing::warn!("All extraction strategies failed");
                ExtractionResult::failed(notes)
            }
        }
    }

    fn settle(
        &self,
        attempt: Attempt,
        method: ExtractionMethod,
        scale: f64,
        notes: Vec<String>,
    ) -> ExtractionResult {
        let raw = attempt.raw.unwrap_or_default();
        ExtractionResult::from_raw(raw, method, attempt.quality, scale, notes)
    }

    /// Runs a strategy on the blocking pool and scores its text.
    async fn run(
        &self,
        strategy: &Arc<dyn ExtractionStrategy>,
        document: &Document,
        format: DocumentFormat,
    ) -> Attempt {
        let name = strategy.name();
        let task_strategy = Arc::clone(strategy);
        let bytes = document.shared_bytes();

        let outcome =
            tokio::task::spawn_blocking(move || task_strategy.extract_raw(&bytes, format))
                .await
                .unwrap_or_else(|e| Err(ExtractionError::TaskAborted(e.to_string())));

        match outcome {
            Ok(raw) => Attempt {
                strategy: name,
                quality: quality::score(&raw.text, &self.settings.keywords),
                raw: Some(raw),
                error: None,
            },
            Err(e) => {
                tracing::warn!(strategy = name, error = %e, "Extraction strategy failed");
                Attempt {
                    strategy: name,
                    raw: None,
                    quality: 0.0,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
