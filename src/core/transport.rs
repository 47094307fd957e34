use pcsc::{Card, MAX_BUFFER_SIZE};

use crate::core::error::TransportError;
use crate::core::utils::format_hex_spaced;

/// A half-duplex channel to one token.
///
/// `exchange` blocks until the full response (payload and status word) has
/// been received; only one exchange is ever in flight.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Transport over a connected PC/SC card
pub struct PcscTransport {
    card: Card,
    reader: String,
}

impl PcscTransport {
    pub fn new(card: Card, reader: impl Into<String>) -> Self {
        Self {
            card,
            reader: reader.into(),
        }
    }
}

impl Transport for PcscTransport {
    fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>, TransportError> {
        log::debug!("[{}] >> {}", self.reader, format_hex_spaced(apdu));

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = self.card.transmit(apdu, &mut response_buf).map_err(|e| {
            log::error!("[{}] transmit failed: {e}", self.reader);
            TransportError::from(e)
        })?;

        log::debug!("[{}] << {}", self.reader, format_hex_spaced(response));
        Ok(response.to_vec())
    }
}

