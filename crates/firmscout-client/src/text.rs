use std::sync::Arc;

use firmscout_core::error::AppError;
use htmd::HtmlToMarkdown;

/// HTML-to-text extractor using htmd.
///
/// Converts rendered HTML into Markdown text, dropping non-content elements
/// (script, style, nav, etc.) so content-length thresholds and analyzer
/// input reflect the visible page, not its boilerplate.
pub struct TextExtractor {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for TextExtractor {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl TextExtractor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn extract(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map_err(|e| AppError::Generic(format!("HTML conversion failed: {e}")))
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_html_to_text() {
        let extractor = TextExtractor::new();
        let text = extractor
            .extract("<h1>Our Team</h1><p>Jane Doe, Partner</p>")
            .unwrap();
        assert!(text.contains("Our Team"));
        assert!(text.contains("Jane Doe"));
    }

    #[test]
    fn strips_scripts_and_nav() {
        let extractor = TextExtractor::new();
        let html = "<nav>Menu</nav><p>Content</p><script>track()</script>";
        let text = extractor.extract(html).unwrap();
        assert!(text.contains("Content"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Menu"));
    }
}
