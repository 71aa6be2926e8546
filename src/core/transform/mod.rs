mod image;
mod question;
mod summarize;

pub use image::image_ref_for;
pub use question::generate_questions;
pub use summarize::summarize;

use async_trait::async_trait;

use crate::core::error::TransformError;
use crate::core::types::{Fingerprint, ProcessedItem, RawItem, TransformOptions};

/// Turns one raw item into its publishable artifacts. Called at most once
/// per item per run; a failure here fails the item, never the run.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn process(
        &self,
        item: &RawItem,
        fingerprint: &Fingerprint,
        topic: &str,
        options: &TransformOptions,
    ) -> Result<ProcessedItem, TransformError>;
}

/// The built-in transformer: extractive summary, templated questions,
/// image reference derivation. Deliberately cheap and deterministic.
pub struct ArticleTransformer;

#[async_trait]
impl Transformer for ArticleTransformer {
    async fn process(
        &self,
        item: &RawItem,
        fingerprint: &Fingerprint,
        topic: &str,
        options: &TransformOptions,
    ) -> Result<ProcessedItem, TransformError> {
        if item.title.trim().is_empty() && item.raw_text.trim().is_empty() {
            return Err(TransformError("item has no title or body".into()));
        }

        let basis = if item.raw_text.trim().is_empty() {
            item.title.as_str()
        } else {
            item.raw_text.as_str()
        };
        let summary = summarize(basis, options.max_sentences);
        let summary = if summary.is_empty() {
            item.title.clone()
        } else {
            summary
        };

        Ok(ProcessedItem {
            fingerprint: fingerprint.clone(),
            summary,
            questions: generate_questions(&item.title, basis, &options.question_kinds),
            image_ref: image_ref_for(item, topic, options.image_mode),
            source_item: item.clone(),
        })
    }
}
