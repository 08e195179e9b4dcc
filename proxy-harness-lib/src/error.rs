use thiserror::Error;

/// Errors that can occur while running a harness session
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No free port found after {attempts} attempts")]
    ResourceExhausted { attempts: usize },

    #[error("TLS identity provisioning failed: {0}")]
    Provisioning(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Client has been stopped")]
    ClientStopped,

    #[error("Invalid session state: expected {expected}, found {found}")]
    InvalidState { expected: &'static str, found: String },
}

impl From<reqwest::Error> for HarnessError {
    fn from(e: reqwest::Error) -> Self {
        HarnessError::Client(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
