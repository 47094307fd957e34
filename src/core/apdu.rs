//! Command/response encoding for the YubiKey OTP application.
//!
//! Commands use the short ISO 7816-4 form `CLA INS P1 P2 [Lc data]`; every
//! response ends with a big-endian status word.

use crate::core::error::{ProtocolError, Result};

pub const CLA_ISO: u8 = 0x00;

pub const INS_SELECT: u8 = 0xA4;
pub const SEL_APP_AID: u8 = 0x04;

pub const INS_API_REQ: u8 = 0x01;
pub const INS_OTP: u8 = 0x02;
pub const INS_STATUS: u8 = 0x03;

pub const CMD_SET_CONF_1: u8 = 0x01;
pub const CMD_SET_CONF_2: u8 = 0x03;
pub const CMD_GET_SERIAL: u8 = 0x10;
pub const CMD_HMAC_1: u8 = 0x30;
pub const CMD_HMAC_2: u8 = 0x38;

pub const SW_OK: u16 = 0x9000;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;

/// Application identifier of the OTP applet
pub const AID_YUBIOTP: [u8; 7] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01];

/// A single command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Option<Vec<u8>>,
}

impl Command {
    /// Create a command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
        }
    }

    /// Attach command data
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn select_otp() -> Self {
        Self::new(CLA_ISO, INS_SELECT, SEL_APP_AID, 0).with_data(AID_YUBIOTP)
    }

    pub fn status() -> Self {
        Self::new(CLA_ISO, INS_STATUS, 0, 0)
    }

    /// Vendor API request, `cmd` selects the operation
    pub fn api_request(cmd: u8) -> Self {
        Self::new(CLA_ISO, INS_API_REQ, cmd, 0)
    }

    /// Serialize to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data_len = self.data.as_ref().map_or(0, Vec::len);
        if data_len > 255 {
            return Err(ProtocolError::CommandTooLong(data_len));
        }

        let mut buffer = Vec::with_capacity(5 + data_len);
        buffer.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        // Lc is only present when there is data; a bare 00 would read as Le
        if let Some(data) = self.data.as_ref().filter(|data| !data.is_empty()) {
            buffer.push(data.len() as u8);
            buffer.extend_from_slice(data);
        }

        Ok(buffer)
    }
}

/// A decoded response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub payload: Vec<u8>,
    pub sw: u16,
}

impl Response {
    /// Split the trailing status word from the payload
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(ProtocolError::MalformedResponse(format!(
                "response of {} bytes has no status word",
                raw.len()
            )));
        }

        let (payload, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            payload: payload.to_vec(),
            sw: u16::from_be_bytes([sw[0], sw[1]]),
        })
    }

    /// Classify the status word
    pub fn into_outcome(self) -> Outcome {
        match self.sw {
            SW_OK => Outcome::Success(self.payload),
            SW_CONDITIONS_NOT_SATISFIED => Outcome::NotPermitted,
            sw => Outcome::Failure(sw),
        }
    }
}

/// Result of a command as seen through its status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<u8>),
    /// 0x6985, the interface mode forbids the operation
    NotPermitted,
    Failure(u16),
}
