/// Stable classification written into `Task::error_kind` on failure. Mirrors
/// the processing-error branch of the taxonomy; input-shape and access
/// errors never reach the scheduler, they are rejected by the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    Oversize,
    Timeout,
    Cancelled,
    Shutdown,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadInput => "BadInput",
            ErrorKind::Oversize => "Oversize",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Shutdown => "Shutdown",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl From<&impose_imposition::ImpositionError> for ErrorKind {
    fn from(err: &impose_imposition::ImpositionError) -> Self {
        use impose_imposition::ImpositionError;
        match err {
            ImpositionError::BadInput(_) => ErrorKind::BadInput,
            ImpositionError::EmptyBatch => ErrorKind::BadInput,
            ImpositionError::Oversize { .. } => ErrorKind::Oversize,
            ImpositionError::Cancelled => ErrorKind::Cancelled,
            ImpositionError::Composer(_) => ErrorKind::Internal,
        }
    }
}
