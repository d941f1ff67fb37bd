use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposerError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("page has no MediaBox in its own dictionary or ancestry")]
    NoMediaBox,

    #[error("{0}")]
    Other(String),
}
