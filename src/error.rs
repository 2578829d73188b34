use thiserror::Error;

/// Why a hosted plugin could not be loaded. The `Display` text is what the
/// editor shows in its status line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("VST3 format not found")]
    FormatUnavailable,
    #[error("No valid VST3 found")]
    NoCandidates,
    #[error("Selected VST3 is not an Audio Effect")]
    WrongKind,
    #[error("{0}")]
    Instantiation(String),
}

impl LoadError {
    pub const UNEXPECTED: &'static str = "Unexpected error occurred";

    /// Wraps a format's failure message, substituting a generic one when the
    /// format gave none.
    pub fn instantiation(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            Self::Instantiation(Self::UNEXPECTED.to_string())
        } else {
            Self::Instantiation(message)
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed state document: {0}")]
    Xml(#[from] roxmltree::Error),
}
