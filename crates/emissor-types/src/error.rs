use thiserror::Error;

/// Errors produced when constructing foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid issuer id {0:?}: expected 14 ASCII digits")]
    InvalidIssuerId(String),

    #[error("unknown environment {0:?}: expected \"homologacao\" or \"producao\"")]
    UnknownEnvironment(String),

    #[error("invalid client id {0:?}: use lowercase letters, digits, '-' or '_'")]
    InvalidClientId(String),

    #[error("invalid amount {0:?}: expected a decimal with at most two fraction digits")]
    InvalidMoney(String),

    #[error("invalid document id: expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
