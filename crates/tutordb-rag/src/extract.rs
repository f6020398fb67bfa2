//! Text extraction collaborators. PDF internals are delegated to the
//! `pdftotext` tool; text and markdown uploads are decoded directly.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use tutordb_core::traits::TextExtractor;
use tutordb_core::{Error, Result};

const PDF_MAGIC: &[u8] = b"%PDF";

/// UTF-8 text and markdown. A leading BOM is dropped.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], _title: &str) -> Result<String> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::InvalidInput(format!("document is not valid UTF-8: {e}")))?;
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// Pipes the PDF through `pdftotext - -`.
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    program: String,
}

impl Default for PdfToTextExtractor {
    fn default() -> Self {
        Self { program: "pdftotext".to_string() }
    }
}

impl PdfToTextExtractor {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl TextExtractor for PdfToTextExtractor {
    async fn extract(&self, bytes: &[u8], title: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(["-layout", "-enc", "UTF-8", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExtractionFailed(format!("failed to start {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ExtractionFailed("extractor stdin unavailable".to_string()))?;
        let input = bytes.to_vec();
        let writer = tokio::spawn(async move {
            let res = stdin.write_all(&input).await;
            drop(stdin);
            res
        });

        let output = child.wait_with_output().await.map_err(|e| Error::ExtractionFailed(e.to_string()))?;
        writer
            .await
            .map_err(|e| Error::ExtractionFailed(e.to_string()))?
            .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExtractionFailed(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }
        let text = String::from_utf8_lossy(&output.stdout).replace('\u{c}', "\n");
        debug!(title, chars = text.chars().count(), "extracted pdf text");
        Ok(text)
    }
}

/// Dispatches on the `%PDF` magic; everything else is treated as text.
#[derive(Debug, Default, Clone)]
pub struct AutoExtractor {
    pdf: PdfToTextExtractor,
    text: PlainTextExtractor,
}

impl AutoExtractor {
    pub fn new(pdf: PdfToTextExtractor) -> Self {
        Self { pdf, text: PlainTextExtractor }
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

#[async_trait]
impl TextExtractor for AutoExtractor {
    async fn extract(&self, bytes: &[u8], title: &str) -> Result<String> {
        if is_pdf(bytes) {
            self.pdf.extract(bytes, title).await
        } else {
            self.text.extract(bytes, title).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_strips_bom_and_rejects_binary() {
        let text = PlainTextExtractor.extract("\u{feff}# Circuits".as_bytes(), "t").await.unwrap();
        assert_eq!(text, "# Circuits");
        let err = PlainTextExtractor.extract(&[0xff, 0xfe, 0x00], "t").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_pdf_tool_is_an_extraction_failure() {
        let auto = AutoExtractor::new(PdfToTextExtractor::with_program("tutordb-no-such-extractor"));
        let err = auto.extract(b"%PDF-1.7\n", "t").await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn pdf_magic_detection() {
        assert!(is_pdf(b"%PDF-1.4 ..."));
        assert!(!is_pdf(b"# heading"));
    }
}
