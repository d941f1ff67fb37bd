use thiserror::Error;

/// Processing-error taxonomy for the imposition engine.
#[derive(Error, Debug)]
pub enum ImpositionError {
    #[error("unreadable PDF: {0}")]
    BadInput(String),

    #[error("batch contains zero pages")]
    EmptyBatch,

    #[error("aggregate input size {actual} bytes exceeds ceiling {limit} bytes")]
    Oversize { actual: u64, limit: u64 },

    #[error("composition error: {0}")]
    Composer(#[from] impose_pdf_composer::ComposerError),

    #[error("cancelled at the caller's request")]
    Cancelled,
}
