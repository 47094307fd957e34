use thiserror::Error;

/// Failure raised by a [`Transport`](crate::core::transport::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

/// Errors returned by [`ProtocolClient`](crate::core::client::ProtocolClient) operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Yubikey OTP application not supported")]
    ApplicationNotSupported,

    #[error("Invalid Yubikey slot: {0}")]
    InvalidSlot(u8),

    #[error("Yubikey slot is not configured for {0}")]
    SlotNotConfigured(&'static str),

    #[error("Yubikey does not allow OTP to be extracted in this mode (e.g. connected over USB)")]
    OtpNotPermittedHere,

    #[error("Yubikey failed to return an OTP (status {0:04X})")]
    OtpReadFailed(u16),

    #[error("Yubikey does not allow HMAC to be extracted in this mode (e.g. button press required)")]
    HmacNotPermittedHere,

    #[error("Yubikey failed to return an HMAC (status {0:04X})")]
    HmacFailed(u16),

    #[error("HMAC challenge is {0} bytes, max is 64")]
    ChallengeTooLong(usize),

    #[error("Yubikey failed to write configuration (status {0:04X})")]
    ProgramFailed(u16),

    #[error("Yubikey serial number could not be read")]
    SerialUnavailable,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Command data too long: {0} bytes")]
    CommandTooLong(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
