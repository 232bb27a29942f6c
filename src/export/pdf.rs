use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ExportError, ExportResult};

/// Every PDF starts with this signature.
const PDF_MAGIC: &[u8] = b"%PDF";

/// HTML to PDF converter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Render a complete HTML document to PDF bytes.
    ///
    /// Implementations must fail rather than return an empty or non-PDF body.
    async fn render(&self, html: &str) -> ExportResult<Vec<u8>>;
}

/// Pipes HTML through an external `wkhtmltopdf` binary.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfRenderer {
    binary: String,
    timeout: Duration,
}

impl WkhtmltopdfRenderer {
    /// Create a renderer for `binary` (a path or a name on `PATH`)
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, html: &str) -> ExportResult<std::process::Output> {
        let mut child = Command::new(&self.binary)
            .args(["--quiet", "--encoding", "utf-8", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExportError::RendererUnavailable {
                message: format!("{}: {}", self.binary, e),
            })?;

        // A converter that exits early closes its stdin; its exit status is
        // the error worth reporting, not the broken pipe. Input is written
        // while output drains, and both count against the timeout.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(html.as_bytes()).await {
                    debug!(binary = %self.binary, error = %e, "Converter stopped reading input");
                }
            }
        };
        let exchange = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ExportError::PdfRendering {
                status: "timeout".to_string(),
                stderr: format!("no result within {} ms", self.timeout.as_millis()),
            }),
        }
    }
}

#[async_trait]
impl PdfRenderer for WkhtmltopdfRenderer {
    async fn render(&self, html: &str) -> ExportResult<Vec<u8>> {
        let output = self.run(html).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(binary = %self.binary, status = %output.status, "PDF converter failed");
            return Err(ExportError::PdfRendering {
                status: output.status.to_string(),
                stderr,
            });
        }

        check_pdf(output.stdout)
    }
}

/// Accept only non-empty output carrying the PDF signature.
pub fn check_pdf(bytes: Vec<u8>) -> ExportResult<Vec<u8>> {
    if bytes.is_empty() {
        return Err(ExportError::EmptyPdf);
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ExportError::PdfRendering {
            status: "invalid output".to_string(),
            stderr: format!("output does not start with %PDF ({} bytes)", bytes.len()),
        });
    }

    debug!(bytes = bytes.len(), "PDF rendered");
    Ok(bytes)
}
