//! LLM-backed post-process step: raw HTML report in, summary text out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PostProcessOutcome, PostProcessRequest, PostProcessor};
use crate::artifacts::{file_size, raw_report_path, summary_is_stale, summary_path};
use crate::llm::{truncate_chars, LlmClient};

const SUMMARY_TEMPLATE: &str = r#"Analyze the brand performance report for "{{brand}}" below and produce a product comparison analysis.

Report: {{size_kb}} KB, {{chars}} characters of extracted text.

Cover only these sections:

### Brand Overview
Weekly revenue and revenue change (absolute and percentage).

### Market Share of Top Subcategories
Every subcategory with its share and share change.

### Top Competitor Brands
Every competitor brand with market share and change.

### Top Product vs. Top Competing Product
For the {{brand}} top product and the top competitor product: name, sales rank, monthly revenue, search terms and ranks, and any side-by-side metrics.

### Top Product and Competitor Searches
All search terms with volumes for both products.

### Shared vs. Unique Keywords
Shared keywords with volumes, then unique keywords per brand with volumes.

Do not add summaries, conclusions, recommendations or any other section. Stop after the last section.

Report text:
{{content}}"#;

/// Regex-based HTML to plain text reduction
pub struct TextExtractor {
    hidden_blocks: Regex,
    comments: Regex,
    line_breaks: Regex,
    tags: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

impl TextExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            hidden_blocks: Regex::new(
                r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<svg\b.*?</svg\s*>",
            )?,
            comments: Regex::new(r"(?s)<!--.*?-->")?,
            line_breaks: Regex::new(r"(?i)<(br|/p|/div|/tr|/li|/h[1-6]|/table)\b[^>]*>")?,
            tags: Regex::new(r"<[^>]*>")?,
            spaces: Regex::new(r"[ \t\r\f\v]+")?,
            blank_lines: Regex::new(r"\n\s*\n+")?,
        })
    }

    pub fn extract(&self, html: &str) -> String {
        let text = self.hidden_blocks.replace_all(html, " ");
        let text = self.comments.replace_all(&text, " ");
        let text = self.line_breaks.replace_all(&text, "\n");
        let text = self.tags.replace_all(&text, " ");
        let text = decode_entities(&text);
        let text = self.spaces.replace_all(&text, " ");
        let text = self.blank_lines.replace_all(&text, "\n");
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
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

pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
    max_input_chars: usize,
    extractor: TextExtractor,
    handlebars: Handlebars<'static>,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>, max_input_chars: usize) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string("summary", SUMMARY_TEMPLATE)
            .context("Failed to register summary prompt template")?;

        Ok(Self {
            client,
            max_input_chars,
            extractor: TextExtractor::new().context("Failed to compile HTML patterns")?,
            handlebars,
        })
    }

    pub fn render_prompt(&self, brand: &str, size_bytes: u64, content: &str) -> Result<String> {
        let context = json!({
            "brand": brand,
            "size_kb": size_bytes / 1024,
            "chars": content.chars().count(),
            "content": content,
        });
        self.handlebars
            .render("summary", &context)
            .context("Failed to render summary prompt")
    }
}

#[async_trait]
impl PostProcessor for LlmSummarizer {
    async fn postprocess(&self, request: PostProcessRequest<'_>) -> Result<PostProcessOutcome> {
        let raw = raw_report_path(request.input_folder, request.brand);
        let summary = summary_path(request.output_folder, request.brand);

        if !request.force_regenerate && summary.is_file() && !summary_is_stale(&raw, &summary) {
            match tokio::fs::read_to_string(&summary).await {
                Ok(text) => {
                    info!(
                        brand = request.brand,
                        path = %summary.display(),
                        "Reusing existing summary"
                    );
                    return Ok(PostProcessOutcome::Produced { text, cached: true });
                }
                Err(err) => {
                    warn!(
                        brand = request.brand,
                        error = %err,
                        "Existing summary unreadable, regenerating"
                    );
                }
            }
        }

        let Some(size) = file_size(&raw) else {
            return Ok(PostProcessOutcome::Failed(format!(
                "raw report not found: {}",
                raw.display()
            )));
        };

        let bytes = tokio::fs::read(&raw)
            .await
            .with_context(|| format!("Failed to read {}", raw.display()))?;
        let text = self.extractor.extract(&String::from_utf8_lossy(&bytes));
        let text = truncate_chars(&text, self.max_input_chars);
        debug!(brand = request.brand, chars = text.len(), "Extracted report text");

        let prompt = self.render_prompt(request.brand, size, &text)?;
        match self
            .client
            .complete(request.provider, request.model, &prompt)
            .await
        {
            Ok(text) => Ok(PostProcessOutcome::Produced {
                text,
                cached: false,
            }),
            Err(err) => Ok(PostProcessOutcome::Failed(err.to_string())),
        }
    }
}
