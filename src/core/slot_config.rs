//! Builder for the slot configuration structure written by `program`.
//!
//! Layout (52 bytes, little-endian CRC):
//!
//! | offset | size | field      |
//! |--------|------|------------|
//! | 0      | 16   | fixed      |
//! | 16     | 6    | uid        |
//! | 22     | 16   | key        |
//! | 38     | 6    | acc_code   |
//! | 44     | 1    | fixed_size |
//! | 45     | 1    | ext_flags  |
//! | 46     | 1    | tkt_flags  |
//! | 47     | 1    | cfg_flags  |
//! | 48     | 2    | rfu        |
//! | 50     | 2    | crc        |
//!
//! The payload sent to the token is the structure followed by the access
//! code currently protecting the slot.

use thiserror::Error;

pub const FIXED_SIZE: usize = 16;
pub const UID_SIZE: usize = 6;
pub const KEY_SIZE: usize = 16;
pub const ACC_CODE_SIZE: usize = 6;
pub const CONFIG_SIZE: usize = 52;
pub const HMAC_KEY_SIZE: usize = 20;

pub const TKTFLAG_CHAL_RESP: u8 = 0x40;

pub const CFGFLAG_CHAL_HMAC: u8 = 0x22;
pub const CFGFLAG_CHAL_BTN_TRIG: u8 = 0x08;

pub const EXTFLAG_SERIAL_USB_VISIBLE: u8 = 0x02;
pub const EXTFLAG_SERIAL_API_VISIBLE: u8 = 0x04;
pub const EXTFLAG_ALLOW_UPDATE: u8 = 0x20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("access code must be 6 bytes, got {0}")]
    AccessCodeLength(usize),

    #[error("HMAC secret must be exactly 20 bytes, got {0}")]
    HmacKeyLength(usize),

    #[error("AES key must be 16 bytes, got {0}")]
    AesKeyLength(usize),

    #[error("public id must be at most 16 bytes, got {0}")]
    PublicIdLength(usize),

    #[error("private id must be 6 bytes, got {0}")]
    PrivateIdLength(usize),
}

/// Six-byte secret gating reprogramming of a slot
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCode([u8; ACC_CODE_SIZE]);

impl AccessCode {
    /// Raw code bytes
    pub fn as_bytes(&self) -> &[u8; ACC_CODE_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for AccessCode {
    type Error = ConfigError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let code: [u8; ACC_CODE_SIZE] = bytes
            .try_into()
            .map_err(|_| ConfigError::AccessCodeLength(bytes.len()))?;
        Ok(Self(code))
    }
}

// Never print the secret
impl std::fmt::Debug for AccessCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCode(..)")
    }
}

/// Configuration for one slot
#[derive(Clone, PartialEq, Eq)]
pub struct SlotConfig {
    fixed: Vec<u8>,
    uid: [u8; UID_SIZE],
    key: [u8; KEY_SIZE],
    acc_code: AccessCode,
    ext_flags: u8,
    tkt_flags: u8,
    cfg_flags: u8,
}

impl SlotConfig {
    fn empty() -> Self {
        Self {
            fixed: Vec::new(),
            uid: [0; UID_SIZE],
            key: [0; KEY_SIZE],
            acc_code: AccessCode::default(),
            ext_flags: EXTFLAG_SERIAL_API_VISIBLE
                | EXTFLAG_SERIAL_USB_VISIBLE
                | EXTFLAG_ALLOW_UPDATE,
            tkt_flags: 0,
            cfg_flags: 0,
        }
    }

    /// HMAC-SHA1 challenge-response with a 20-byte secret.
    ///
    /// The first 16 bytes of the secret go in `key`, the last 4 in `uid`.
    pub fn hmac_sha1(secret: &[u8]) -> Result<Self, ConfigError> {
        if secret.len() != HMAC_KEY_SIZE {
            return Err(ConfigError::HmacKeyLength(secret.len()));
        }

        let mut config = Self::empty();
        config.key.copy_from_slice(&secret[..KEY_SIZE]);
        config.uid[..HMAC_KEY_SIZE - KEY_SIZE].copy_from_slice(&secret[KEY_SIZE..]);
        config.tkt_flags = TKTFLAG_CHAL_RESP;
        config.cfg_flags = CFGFLAG_CHAL_HMAC;
        Ok(config)
    }

    /// Yubico OTP with the given public id, private id and AES key
    pub fn yubico_otp(
        public_id: &[u8],
        private_id: &[u8],
        aes_key: &[u8],
    ) -> Result<Self, ConfigError> {
        if public_id.len() > FIXED_SIZE {
            return Err(ConfigError::PublicIdLength(public_id.len()));
        }
        let uid: [u8; UID_SIZE] = private_id
            .try_into()
            .map_err(|_| ConfigError::PrivateIdLength(private_id.len()))?;
        let key: [u8; KEY_SIZE] = aes_key
            .try_into()
            .map_err(|_| ConfigError::AesKeyLength(aes_key.len()))?;

        let mut config = Self::empty();
        config.fixed = public_id.to_vec();
        config.uid = uid;
        config.key = key;
        Ok(config)
    }

    /// Require a button press before the token answers a challenge
    pub fn require_touch(mut self, touch: bool) -> Self {
        if touch {
            self.cfg_flags |= CFGFLAG_CHAL_BTN_TRIG;
        } else {
            self.cfg_flags &= !CFGFLAG_CHAL_BTN_TRIG;
        }
        self
    }

    /// Protect the slot with `code` once written
    pub fn with_access_code(mut self, code: AccessCode) -> Self {
        self.acc_code = code;
        self
    }

    /// Serialize the 52-byte structure, CRC included
    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut buf = [0u8; CONFIG_SIZE];

        buf[..self.fixed.len()].copy_from_slice(&self.fixed);
        buf[16..22].copy_from_slice(&self.uid);
        buf[22..38].copy_from_slice(&self.key);
        buf[38..44].copy_from_slice(self.acc_code.as_bytes());
        buf[44] = self.fixed.len() as u8;
        buf[45] = self.ext_flags;
        buf[46] = self.tkt_flags;
        buf[47] = self.cfg_flags;

        let crc = !crc16(&buf[..CONFIG_SIZE - 2]);
        buf[50..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Command data for a slot write: structure plus current access code
    pub fn payload(&self, current: Option<&AccessCode>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(CONFIG_SIZE + ACC_CODE_SIZE);
        payload.extend_from_slice(&self.to_bytes());
        payload.extend_from_slice(current.copied().unwrap_or_default().as_bytes());
        payload
    }
}

impl std::fmt::Debug for SlotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotConfig")
            .field("fixed_size", &self.fixed.len())
            .field("ext_flags", &format_args!("{:#04x}", self.ext_flags))
            .field("tkt_flags", &format_args!("{:#04x}", self.tkt_flags))
            .field("cfg_flags", &format_args!("{:#04x}", self.cfg_flags))
            .finish_non_exhaustive()
    }
}

/// ISO 13239 CRC-16 (reflected 0x8408, initial 0xFFFF, no final xor)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            let carry = crc & 1;
            crc >>= 1;
            if carry != 0 {
                crc ^= 0x8408;
            }
        }
    }
    crc
}
