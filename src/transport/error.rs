use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("unknown or expired receipt handle: {0}")]
    UnknownReceipt(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}
