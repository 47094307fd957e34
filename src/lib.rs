//! yktool - YubiKey OTP application client
//!
//! This library speaks the OTP applet protocol over PC/SC: reading the
//! device identity and slot status, extracting one-time passwords,
//! HMAC-SHA1 challenge-response, and programming slot configurations.

pub mod cli;
pub mod core;

// Re-export commonly used types
pub use self::core::{
    client::{DeviceIdentity, ProtocolClient, Slot, SlotStatus},
    error::{ProtocolError, TransportError},
    registry::DeviceRegistry,
    slot_config::{AccessCode, SlotConfig},
    transport::Transport,
};
