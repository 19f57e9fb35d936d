// src/pipeline.rs

use crate::llm_extract::{self, ChatModel, LlmError};
use crate::ocr::{OcrError, OcrService};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{Instrument, error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The OCR service itself failed. The operator can rerun after fixing
    /// credentials or the document.
    #[error("{0}")]
    OcrService(OcrError),
    #[error(transparent)]
    Io(OcrError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl From<OcrError> for PipelineError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::Service { .. } => PipelineError::OcrService(err),
            OcrError::Io { .. } => PipelineError::Io(err),
        }
    }
}

impl PipelineError {
    /// Process exit status for errors that are handled rather than propagated.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::OcrService(_) => Some(1),
            _ => None,
        }
    }

    /// Writes the message for a handled error to `out` and returns its exit
    /// status. Unhandled errors write nothing.
    pub fn report(&self, out: &mut impl Write) -> Option<i32> {
        let code = self.exit_code()?;
        // Best effort; the exit status is what matters.
        let _ = writeln!(out, "{self}");
        Some(code)
    }
}

/// OCR the document, then ask the model for the structured record.
///
/// Prints the OCR text and the raw reply to stdout. The model is never
/// called if OCR fails.
pub async fn process_1003_pdf<O, M>(
    ocr: &O,
    model: &M,
    path: &Path,
    pages: Option<&[u32]>,
) -> Result<String, PipelineError>
where
    O: OcrService + ?Sized,
    M: ChatModel + ?Sized,
{
    let span = tracing::info_span!("document", path = %path.display());
    async {
        let extracted_text = ocr.extract(path, pages).await.inspect_err(|e| {
            if let OcrError::Service { status, .. } = e {
                error!(status = ?status, error = %e, "OCR service error");
            }
        })?;
        info!(chars = extracted_text.len(), "OCR complete");
        println!("{extracted_text}");

        let response = llm_extract::extract_structured_record(model, &extracted_text).await?;
        println!("Response from LLM:\n{response}");
        Ok::<_, PipelineError>(response)
    }
    .instrument(span)
    .await
}
