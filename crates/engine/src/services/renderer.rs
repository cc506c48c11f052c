//! Certificate renderer trait and a self-contained PDF implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Everything printed on a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDocument {
    pub student_name: String,
    pub course_name: String,
    pub completion_date: DateTime<Utc>,
    pub certificate_id: String,
    pub grade: String,
    pub verification_url: String,
}

/// A render attempt failed. Renders are retried, so every failure is
/// treated as transient.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Produces the downloadable artifact (PDF bytes).
    async fn render(&self, document: &CertificateDocument) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, Default)]
struct RendererControls {
    failures_left: AtomicU32,
    delay_ms: AtomicU64,
    renders: AtomicU32,
}

/// Renders a one-page PDF in process.
///
/// Failures and slowness can be injected for exercising the retry path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCertificateRenderer {
    controls: Arc<RendererControls>,
}

impl InMemoryCertificateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` render calls fail.
    pub fn fail_next(&self, count: u32) {
        self.controls.failures_left.store(count, Ordering::SeqCst);
    }

    /// Makes every render call take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.controls
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Render calls made so far, successful or not.
    pub fn render_count(&self) -> u32 {
        self.controls.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateRenderer for InMemoryCertificateRenderer {
    async fn render(&self, document: &CertificateDocument) -> Result<Vec<u8>, RenderError> {
        self.controls.renders.fetch_add(1, Ordering::SeqCst);

        let delay = self.controls.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .controls
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RenderError("renderer unavailable".to_string()));
        }

        Ok(certificate_pdf(document))
    }
}

/// Lays out the certificate text on an A4 landscape page.
pub fn certificate_pdf(document: &CertificateDocument) -> Vec<u8> {
    let lines: Vec<(u32, u32, String)> = vec![
        (36, 480, "Certificate of Completion".to_string()),
        (16, 420, "This is to certify that".to_string()),
        (30, 375, document.student_name.clone()),
        (16, 330, "has successfully completed the course".to_string()),
        (24, 290, document.course_name.clone()),
        (18, 245, format!("Grade: {}", document.grade)),
        (
            14,
            210,
            format!("Issued on {}", document.completion_date.format("%B %-d, %Y")),
        ),
        (
            10,
            120,
            format!("Certificate ID: {}", document.certificate_id),
        ),
        (10, 100, format!("Verify at {}", document.verification_url)),
    ];
    single_page_pdf(842, 595, &lines)
}

/// Writes a minimal PDF 1.4 file with one page of Helvetica text lines,
/// each given as (font size, baseline y, text).
fn single_page_pdf(width: u32, height: u32, lines: &[(u32, u32, String)]) -> Vec<u8> {
    let mut content = String::from("BT\n");
    for (size, y, text) in lines {
        content.push_str(&format!(
            "/F1 {size} Tf\n1 0 0 1 60 {y} Tm\n({}) Tj\n",
            escape_pdf_text(text)
        ));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!(
            "<< /Length {} >>\nstream\n{content}endstream",
            content.len()
        ),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", index + 1).as_bytes());
    }

    let xref_at = out.len();
    let mut trailer = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        trailer.push_str(&format!("{offset:010} 00000 n \n"));
    }
    trailer.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    out.extend_from_slice(trailer.as_bytes());
    out
}

/// Escapes a string for a PDF literal. Characters outside Latin-1 are
/// replaced, since the standard Helvetica encoding cannot show them.
fn escape_pdf_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => escaped.push(c),
            _ => escaped.push('?'),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> CertificateDocument {
        CertificateDocument {
            student_name: "Asha (A.) Rao".to_string(),
            course_name: "Rust Basics".to_string(),
            completion_date: Utc::now(),
            certificate_id: "CERT-0001".to_string(),
            grade: "A+".to_string(),
            verification_url: "http://localhost:5173/verify-certificate/CERT-0001".to_string(),
        }
    }

    #[tokio::test]
    async fn renders_a_pdf() {
        let renderer = InMemoryCertificateRenderer::new();
        let bytes = renderer.render(&document()).await.unwrap();

        assert!(bytes.starts_with(b"%PDF-1.4"));
        assert!(bytes.ends_with(b"%%EOF\n"));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("(Asha \\(A.\\) Rao) Tj"));
        assert!(text.contains("Grade: A+"));
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let renderer = InMemoryCertificateRenderer::new();
        renderer.fail_next(2);

        assert!(renderer.render(&document()).await.is_err());
        assert!(renderer.render(&document()).await.is_err());
        assert!(renderer.render(&document()).await.is_ok());
        assert_eq!(renderer.render_count(), 3);
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let pdf = single_page_pdf(100, 100, &[(12, 50, "hi".to_string())]);
        let text = String::from_utf8(pdf).unwrap();
        let first_offset: usize = text
            .lines()
            .skip_while(|l| !l.starts_with("0000000000"))
            .nth(1)
            .and_then(|l| l.split(' ').next())
            .unwrap()
            .parse()
            .unwrap();
        assert!(text[first_offset..].starts_with("1 0 obj"));
    }

    #[test]
    fn non_latin_text_is_replaced() {
        assert_eq!(escape_pdf_text("Zoë"), "Zo?");
    }
}
