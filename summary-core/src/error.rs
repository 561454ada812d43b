/// Errors surfaced to callers. Missing data is never an error; it lives in the
/// model as [`crate::Recorded`] markers.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("malformed {format} input: {message}")]
    MalformedInput {
        format: &'static str,
        message: String,
    },
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),
    #[error("session store failure: {0}")]
    Session(String),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SummaryError {
    pub fn malformed_xml(message: impl Into<String>) -> Self {
        SummaryError::MalformedInput {
            format: "CDA XML",
            message: message.into(),
        }
    }

    pub fn malformed_json(message: impl Into<String>) -> Self {
        SummaryError::MalformedInput {
            format: "FHIR JSON",
            message: message.into(),
        }
    }
}

pub type SummaryResult<T> = Result<T, SummaryError>;
