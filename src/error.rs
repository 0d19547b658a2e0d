//! Error types for wallet custody

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wallet custody
#[derive(Error, Debug)]
pub enum Error {
    // Authenticator errors
    #[error("Platform authenticator is not available")]
    AuthenticatorUnsupported,

    #[error("Authenticator ceremony was cancelled")]
    AuthenticatorCeremonyCancelled,

    #[error("No credential found for handle")]
    HandleNotFound,

    #[error("Insecure credential storage: {0}")]
    InsecureCredential(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    // Password store errors. DecryptionFailed carries no cause.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    // Onboarding validation errors
    #[error("Wallet name already in use: {0}")]
    NameAlreadyInUse(String),

    #[error("Invalid wallet name: {0}")]
    InvalidWalletName(String),

    #[error("Onboarding step out of order: {0}")]
    OnboardingState(String),

    // Key material errors
    #[error("Secure random source unavailable: {0}")]
    EntropySourceUnavailable(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    // Registry errors
    #[error("Invalid wallet id: {0}")]
    InvalidWalletId(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Derived account {derived} does not match registered address {expected}")]
    AccountMismatch { expected: String, derived: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a user cancellation (a normal, non-fatal outcome)
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::AuthenticatorCeremonyCancelled)
    }

    /// Check if this error should be shown to the user as something they can fix
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Error::AuthenticatorUnsupported
                | Error::AuthenticatorCeremonyCancelled
                | Error::HandleNotFound
                | Error::DecryptionFailed
                | Error::InvalidPassword(_)
                | Error::NameAlreadyInUse(_)
                | Error::InvalidWalletName(_)
                | Error::WalletNotFound(_)
        )
    }

    /// Check if this error must abort wallet creation entirely
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::EntropySourceUnavailable(_))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from blocking task join errors
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Blocking task failed: {}", e))
    }
}
