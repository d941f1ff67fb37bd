use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("filename is empty or rejected after sanitization")]
    BadName,

    #[error("upload exceeded the configured size ceiling ({limit} bytes)")]
    TooLarge { limit: u64 },

    #[error("declared content-length did not match bytes received")]
    LengthMismatch,

    #[error("zip entry path would escape the extraction root")]
    ZipSlip,

    #[error("zip archive decompressed size exceeds the configured ceiling")]
    ZipBomb,

    #[error("resolved path escaped its expected storage subtree")]
    PathEscape,

    #[error("object not found")]
    NotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}
