//! Session layer for the YubiKey OTP application.
//!
//! Every public operation re-selects the applet before issuing its own
//! command: switching interfaces on the token silently deselects it.

use serde::Serialize;
use std::fmt;

use crate::core::apdu::{
    Command, Outcome, Response, CMD_GET_SERIAL, CMD_HMAC_1, CMD_HMAC_2, CMD_SET_CONF_1,
    CMD_SET_CONF_2, CLA_ISO, INS_OTP, SW_CONDITIONS_NOT_SATISFIED, SW_OK,
};
use crate::core::error::{ProtocolError, Result};
use crate::core::transport::Transport;
use crate::core::utils::describe_status_word;

pub const MAX_CHALLENGE_SIZE: usize = 64;

const CONFIG1_VALID: u16 = 0x01;
const CONFIG1_TOUCH: u16 = 0x02;
const CONFIG2_VALID: u16 = 0x04;
const CONFIG2_TOUCH: u16 = 0x08;

/// One of the two configuration slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    /// 1-based slot number
    pub fn number(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }
}

impl TryFrom<u8> for Slot {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            n => Err(ProtocolError::InvalidSlot(n)),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Firmware version and program sequence reported by the applet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub program_sequence: u8,
}

impl DeviceIdentity {
    fn parse(data: &[u8]) -> Result<Self> {
        match data {
            [major, minor, patch, program_sequence, ..] => Ok(Self {
                major: *major,
                minor: *minor,
                patch: *patch,
                program_sequence: *program_sequence,
            }),
            _ => Err(ProtocolError::MalformedResponse(format!(
                "expected at least 4 bytes of version data, got {}",
                data.len()
            ))),
        }
    }

    /// A program sequence of zero means the token was never configured
    pub fn is_configured(&self) -> bool {
        self.program_sequence != 0
    }

    /// Marketing model name derived from the major version
    pub fn model(&self) -> Option<&'static str> {
        match self.major {
            3 => Some("NEO"),
            4 => Some("4"),
            5 => Some("5"),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Per-slot "configured" and "touch required" flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStatus(u16);

impl SlotStatus {
    /// Wrap the raw little-endian status field
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn is_valid(&self, slot: Slot) -> bool {
        let mask = match slot {
            Slot::One => CONFIG1_VALID,
            Slot::Two => CONFIG2_VALID,
        };
        self.0 & mask != 0
    }

    pub fn requires_touch(&self, slot: Slot) -> bool {
        let mask = match slot {
            Slot::One => CONFIG1_TOUCH,
            Slot::Two => CONFIG2_TOUCH,
        };
        self.0 & mask != 0
    }
}

/// Serializable snapshot of a probed token
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub serial: Option<u32>,
    pub version: String,
    pub program_sequence: u8,
    pub slot1_configured: bool,
    pub slot1_touch: bool,
    pub slot2_configured: bool,
    pub slot2_touch: bool,
}

/// Client for the OTP applet on one token
pub struct ProtocolClient<T> {
    transport: T,
    identity: Option<DeviceIdentity>,
    status: Option<SlotStatus>,
}

impl<T: Transport> ProtocolClient<T> {
    /// Wrap a transport; nothing is sent until the first operation
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            identity: None,
            status: None,
        }
    }

    /// Last identity seen by a select or status command
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    /// Last slot status seen by a status command
    pub fn status(&self) -> Option<SlotStatus> {
        self.status
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn transmit(&mut self, command: &Command) -> Result<Response> {
        let apdu = command.to_bytes()?;
        let raw = self.transport.exchange(&apdu)?;
        let response = Response::from_bytes(&raw)?;

        if response.sw != SW_OK {
            log::debug!(
                "INS {:02X} P1 {:02X} -> {:04X} ({})",
                command.ins,
                command.p1,
                response.sw,
                describe_status_word(response.sw)
            );
        }
        Ok(response)
    }

    /// Select the OTP applet and cache the identity it reports
    pub fn select_application(&mut self) -> Result<DeviceIdentity> {
        match self.transmit(&Command::select_otp())?.into_outcome() {
            Outcome::Success(data) => {
                let identity = DeviceIdentity::parse(&data)?;
                self.identity = Some(identity);
                Ok(identity)
            }
            _ => Err(ProtocolError::ApplicationNotSupported),
        }
    }

    fn ensure_selected(&mut self) -> Result<()> {
        self.select_application().map(|_| ())
    }

    /// Re-read identity and slot status
    pub fn refresh_status(&mut self) -> Result<(DeviceIdentity, SlotStatus)> {
        self.ensure_selected()?;

        match self.transmit(&Command::status())?.into_outcome() {
            Outcome::Success(data) => {
                let identity = DeviceIdentity::parse(&data)?;
                let status = match data.get(4..6) {
                    Some(&[lo, hi]) => SlotStatus::from_bits(u16::from_le_bytes([lo, hi])),
                    _ => {
                        return Err(ProtocolError::MalformedResponse(format!(
                            "expected 6 bytes of status data, got {}",
                            data.len()
                        )))
                    }
                };

                self.identity = Some(identity);
                self.status = Some(status);
                Ok((identity, status))
            }
            _ => Err(ProtocolError::ApplicationNotSupported),
        }
    }

    /// Read the serial number through the vendor API
    pub fn fetch_serial(&mut self) -> Result<u32> {
        self.ensure_selected()?;

        match self
            .transmit(&Command::api_request(CMD_GET_SERIAL))?
            .into_outcome()
        {
            Outcome::Success(data) => match data.get(..4) {
                Some(&[a, b, c, d]) => Ok(u32::from_be_bytes([a, b, c, d])),
                _ => Err(ProtocolError::MalformedResponse(format!(
                    "expected 4 bytes of serial number, got {}",
                    data.len()
                ))),
            },
            _ => Err(ProtocolError::SerialUnavailable),
        }
    }

    /// Read the one-time password from `slot`
    pub fn fetch_otp(&mut self, slot: u8) -> Result<String> {
        let slot = Slot::try_from(slot)?;
        self.ensure_selected()?;

        let command = Command::new(CLA_ISO, INS_OTP, slot.number() - 1, 0);
        match self.transmit(&command)?.into_outcome() {
            Outcome::Success(data) if data.is_empty() => {
                Err(ProtocolError::SlotNotConfigured("OTP"))
            }
            Outcome::Success(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
            Outcome::NotPermitted => Err(ProtocolError::OtpNotPermittedHere),
            Outcome::Failure(sw) => Err(ProtocolError::OtpReadFailed(sw)),
        }
    }

    /// HMAC-SHA1 challenge-response using the key programmed into `slot`
    pub fn compute_hmac(&mut self, slot: u8, challenge: &[u8]) -> Result<Vec<u8>> {
        let slot = Slot::try_from(slot)?;
        if challenge.len() > MAX_CHALLENGE_SIZE {
            return Err(ProtocolError::ChallengeTooLong(challenge.len()));
        }
        self.ensure_selected()?;

        let cmd = match slot {
            Slot::One => CMD_HMAC_1,
            Slot::Two => CMD_HMAC_2,
        };
        let command = Command::api_request(cmd).with_data(challenge);
        match self.transmit(&command)?.into_outcome() {
            Outcome::Success(data) if data.is_empty() => {
                Err(ProtocolError::SlotNotConfigured("HMAC"))
            }
            Outcome::Success(data) => Ok(data),
            Outcome::NotPermitted => Err(ProtocolError::HmacNotPermittedHere),
            Outcome::Failure(sw) => Err(ProtocolError::HmacFailed(sw)),
        }
    }

    /// Overwrite `slot` with a pre-built configuration payload
    pub fn write_slot_config(&mut self, slot: u8, payload: &[u8]) -> Result<()> {
        let slot = Slot::try_from(slot)?;
        self.ensure_selected()?;

        let cmd = match slot {
            Slot::One => CMD_SET_CONF_1,
            Slot::Two => CMD_SET_CONF_2,
        };
        log::info!("Writing {} byte configuration to slot {}", payload.len(), slot);

        let command = Command::api_request(cmd).with_data(payload);
        match self.transmit(&command)?.into_outcome() {
            Outcome::Success(_) => Ok(()),
            Outcome::NotPermitted => Err(ProtocolError::ProgramFailed(SW_CONDITIONS_NOT_SATISFIED)),
            Outcome::Failure(sw) => Err(ProtocolError::ProgramFailed(sw)),
        }
    }

    /// One-line description, e.g. `Yubikey 4 #1234567 v4.3.7 +slot1`.
    ///
    /// A failing serial read is rendered as `(Unknown serial #)`.
    pub fn describe(&mut self) -> String {
        let mut out = String::from("Yubikey");
        if let Some(model) = self.identity.and_then(|id| id.model()) {
            out.push(' ');
            out.push_str(model);
        }

        match self.fetch_serial() {
            Ok(serial) => out.push_str(&format!(" #{serial}")),
            Err(e) => {
                log::debug!("Serial number unavailable: {e}");
                out.push_str(" (Unknown serial #)");
            }
        }

        match self.identity {
            Some(identity) => out.push_str(&format!(" v{identity}")),
            None => out.push_str(" v?"),
        }

        let status = self.status.unwrap_or_default();
        if status.is_valid(Slot::One) {
            out.push_str(" +slot1");
        }
        if status.is_valid(Slot::Two) {
            out.push_str(" +slot2");
        }
        out
    }

    /// Snapshot of the cached state, serial supplied by the caller
    pub fn summary(&self, serial: Option<u32>) -> DeviceSummary {
        let status = self.status.unwrap_or_default();
        DeviceSummary {
            serial,
            version: self
                .identity
                .map(|id| id.to_string())
                .unwrap_or_default(),
            program_sequence: self.identity.map_or(0, |id| id.program_sequence),
            slot1_configured: status.is_valid(Slot::One),
            slot1_touch: status.requires_touch(Slot::One),
            slot2_configured: status.is_valid(Slot::Two),
            slot2_touch: status.requires_touch(Slot::Two),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TransportError;
    use crate::core::transport::MockTransport;
    use mockall::Sequence;

    const SELECT: [u8; 12] = [
        0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01,
    ];

    fn expect_select(mock: &mut MockTransport, seq: &mut Sequence, reply: Vec<u8>) {
        mock.expect_exchange()
            .times(1)
            .in_sequence(seq)
            .withf(|apdu| apdu.to_vec() == SELECT.to_vec())
            .returning(move |_| Ok(reply.clone()));
    }

    fn expect_command(
        mock: &mut MockTransport,
        seq: &mut Sequence,
        expected: Vec<u8>,
        reply: Vec<u8>,
    ) {
        mock.expect_exchange()
            .times(1)
            .in_sequence(seq)
            .withf(move |apdu| apdu.to_vec() == expected)
            .returning(move |_| Ok(reply.clone()));
    }

    fn select_ok() -> Vec<u8> {
        vec![0x04, 0x03, 0x07, 0x02, 0x90, 0x00]
    }

    #[test]
    fn test_invalid_slot_issues_no_exchange() {
        // No expectations: any exchange would panic
        let mut client = ProtocolClient::new(MockTransport::new());

        for slot in [0u8, 3, 255] {
            assert!(matches!(
                client.fetch_otp(slot),
                Err(ProtocolError::InvalidSlot(n)) if n == slot
            ));
            assert!(matches!(
                client.compute_hmac(slot, b"challenge"),
                Err(ProtocolError::InvalidSlot(_))
            ));
            assert!(matches!(
                client.write_slot_config(slot, &[0u8; 58]),
                Err(ProtocolError::InvalidSlot(_))
            ));
        }
    }

    #[test]
    fn test_select_caches_identity() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());

        let mut client = ProtocolClient::new(mock);
        let identity = client.select_application().unwrap();

        assert_eq!(
            identity,
            DeviceIdentity {
                major: 4,
                minor: 3,
                patch: 7,
                program_sequence: 2
            }
        );
        assert_eq!(client.identity(), Some(identity));
        assert!(client.status().is_none());
    }

    #[test]
    fn test_select_failure_keeps_cached_identity() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_select(&mut mock, &mut seq, vec![0x6A, 0x82]);

        let mut client = ProtocolClient::new(mock);
        let first = client.select_application().unwrap();

        assert!(matches!(
            client.select_application(),
            Err(ProtocolError::ApplicationNotSupported)
        ));
        assert_eq!(client.identity(), Some(first));
    }

    #[test]
    fn test_transport_failure_is_wrapped() {
        let mut mock = MockTransport::new();
        mock.expect_exchange()
            .times(1)
            .returning(|_| Err(TransportError::Channel("card removed".to_string())));

        let mut client = ProtocolClient::new(mock);
        assert!(matches!(
            client.fetch_serial(),
            Err(ProtocolError::Transport(TransportError::Channel(_)))
        ));
        assert!(client.identity().is_none());
    }

    #[test]
    fn test_refresh_status_decodes_flags() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x03, 0x00, 0x00],
            vec![0x01, 0x02, 0x03, 0x00, 0x05, 0x00, 0x90, 0x00],
        );

        let mut client = ProtocolClient::new(mock);
        let (identity, status) = client.refresh_status().unwrap();

        assert_eq!(identity.to_string(), "1.2.3");
        assert!(!identity.is_configured());
        assert_eq!(status, SlotStatus::from_bits(0x0005));
        assert!(status.is_valid(Slot::One));
        assert!(!status.requires_touch(Slot::One));
        assert!(status.is_valid(Slot::Two));
        assert!(!status.requires_touch(Slot::Two));
        assert_eq!(client.identity(), Some(identity));
        assert_eq!(client.status(), Some(status));
    }

    #[test]
    fn test_refresh_status_short_payload() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x03, 0x00, 0x00],
            vec![0x01, 0x02, 0x03, 0x00, 0x90, 0x00],
        );

        let mut client = ProtocolClient::new(mock);
        assert!(matches!(
            client.refresh_status(),
            Err(ProtocolError::MalformedResponse(_))
        ));
        assert!(client.status().is_none());
    }

    #[test]
    fn test_fetch_serial_big_endian() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x01, 0x10, 0x00],
            vec![0x00, 0x00, 0x01, 0x02, 0x90, 0x00],
        );

        let mut client = ProtocolClient::new(mock);
        assert_eq!(client.fetch_serial().unwrap(), 258);
    }

    #[test]
    fn test_fetch_serial_failure() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x01, 0x10, 0x00],
            vec![0x6D, 0x00],
        );

        let mut client = ProtocolClient::new(mock);
        assert!(matches!(
            client.fetch_serial(),
            Err(ProtocolError::SerialUnavailable)
        ));
    }

    #[test]
    fn test_fetch_otp_uses_zero_based_slot() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x02, 0x01, 0x00],
            b"cccccbhkevhe\x90\x00".to_vec(),
        );

        let mut client = ProtocolClient::new(mock);
        assert_eq!(client.fetch_otp(2).unwrap(), "cccccbhkevhe");
    }

    #[test]
    fn test_hmac_not_permitted_ignores_payload() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x01, 0x38, 0x00, 0x03, 0x61, 0x62, 0x63],
            vec![0xDE, 0xAD, 0x69, 0x85],
        );

        let mut client = ProtocolClient::new(mock);
        assert!(matches!(
            client.compute_hmac(2, b"abc"),
            Err(ProtocolError::HmacNotPermittedHere)
        ));
    }

    #[test]
    fn test_hmac_empty_challenge_has_no_lc() {
        let digest = vec![0x5C; 20];
        let mut reply = digest.clone();
        reply.extend_from_slice(&[0x90, 0x00]);

        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(&mut mock, &mut seq, vec![0x00, 0x01, 0x30, 0x00], reply);

        let mut client = ProtocolClient::new(mock);
        assert_eq!(client.compute_hmac(1, &[]).unwrap(), digest);
    }

    #[test]
    fn test_slot_status_bits() {
        let status = SlotStatus::from_bits(0x000A);
        assert!(!status.is_valid(Slot::One));
        assert!(status.requires_touch(Slot::One));
        assert!(!status.is_valid(Slot::Two));
        assert!(status.requires_touch(Slot::Two));

        let both = SlotStatus::from_bits(0x0005);
        assert!(both.is_valid(Slot::One) && both.is_valid(Slot::Two));
        assert!(!both.requires_touch(Slot::One) && !both.requires_touch(Slot::Two));
    }

    #[test]
    fn test_hmac_challenge_too_long() {
        let mut client = ProtocolClient::new(MockTransport::new());
        assert!(matches!(
            client.compute_hmac(1, &[0u8; 65]),
            Err(ProtocolError::ChallengeTooLong(65))
        ));
    }

    #[test]
    fn test_write_slot_config_two_exchanges() {
        let payload = vec![0x5A; 58];
        let mut expected = vec![0x00, 0x01, 0x03, 0x00, 58];
        expected.extend_from_slice(&payload);

        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(&mut mock, &mut seq, expected, vec![0x90, 0x00]);

        let mut client = ProtocolClient::new(mock);
        client.write_slot_config(2, &payload).unwrap();
    }

    #[test]
    fn test_write_slot_config_failure() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        mock.expect_exchange()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![0x6A, 0x80]));

        let mut client = ProtocolClient::new(mock);
        assert!(matches!(
            client.write_slot_config(1, &[0u8; 58]),
            Err(ProtocolError::ProgramFailed(0x6A80))
        ));
        assert!(client.status().is_none());
    }

    #[test]
    fn test_describe_swallows_serial_failure() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        expect_select(&mut mock, &mut seq, select_ok());
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x03, 0x00, 0x00],
            vec![0x03, 0x04, 0x01, 0x01, 0x0C, 0x00, 0x90, 0x00],
        );
        expect_select(&mut mock, &mut seq, vec![0x03, 0x04, 0x01, 0x01, 0x90, 0x00]);
        expect_command(
            &mut mock,
            &mut seq,
            vec![0x00, 0x01, 0x10, 0x00],
            vec![0x6A, 0x81],
        );

        let mut client = ProtocolClient::new(mock);
        client.refresh_status().unwrap();
        assert_eq!(client.describe(), "Yubikey NEO (Unknown serial #) v3.4.1 +slot2");
    }

    #[test]
    fn test_slot_try_from() {
        assert_eq!(Slot::try_from(1).unwrap(), Slot::One);
        assert_eq!(Slot::try_from(2).unwrap(), Slot::Two);
        assert!(Slot::try_from(0).is_err());
        assert_eq!(Slot::Two.to_string(), "2");
    }
}
