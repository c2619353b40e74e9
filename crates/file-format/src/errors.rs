/// Errors from the interchange codecs.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported format: {format}")]
    Unsupported { format: String },

    #[error("export failed: {reason}")]
    Export { reason: String },

    #[error("import failed: {reason}")]
    Import { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
