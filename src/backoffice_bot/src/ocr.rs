//! The OCR seam: paper invoice photos in, structured documents out.
//!
//! Vision extraction is an external concern; the workflow only sees this
//! opaque function. Amounts arrive as decimals, and a line whose VAT rate is
//! absent from the mapping base carries `rate_unknown = true` — that flag is
//! authoritative and suppresses the sum-mismatch warning downstream (a "22%"
//! rate has been observed in the wild and must not be treated as noise).

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("no document found in {0} photo(s)")]
    Empty(usize),
}

#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub name: String,
    pub amount: BigDecimal,
    pub price: Option<BigDecimal>,
    pub total: Option<BigDecimal>,
    pub vat_percent: Option<BigDecimal>,
    /// The rate did not resolve against the mapping base.
    pub rate_unknown: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub supplier_name: Option<String>,
    pub items: Vec<ExtractedItem>,
    pub total: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub documents: Vec<ExtractedDocument>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait InvoiceExtractor: Send + Sync {
    /// `photos` are raw image bytes, one entry per page.
    async fn extract(&self, photos: &[Vec<u8>]) -> Result<ExtractionResult, OcrError>;
}

/// Extractor for deployments without a vision backend: every photo is
/// answered with a clean error the workflow turns into a user notice.
pub struct DisabledExtractor;

#[async_trait]
impl InvoiceExtractor for DisabledExtractor {
    async fn extract(&self, _photos: &[Vec<u8>]) -> Result<ExtractionResult, OcrError> {
        Err(OcrError::Extraction(
            "распознавание накладных не настроено".into(),
        ))
    }
}
