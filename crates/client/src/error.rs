#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid artifact name: {0}")]
    InvalidArtifactName(#[from] kiln_core::DomainError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}
