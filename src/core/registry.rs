use serde::Serialize;

use crate::core::client::{DeviceSummary, ProtocolClient};
use crate::core::error::ProtocolError;
use crate::core::transport::Transport;

/// A probed token running the OTP applet
pub struct Device<T> {
    pub reader: String,
    pub serial: Option<u32>,
    pub client: ProtocolClient<T>,
}

impl<T: Transport> Device<T> {
    /// Serializable view of this token for `list --json`
    pub fn listing(&self) -> DeviceListing {
        DeviceListing {
            reader: self.reader.clone(),
            summary: self.client.summary(self.serial),
        }
    }
}

/// One entry of `list --json`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceListing {
    pub reader: String,
    #[serde(flatten)]
    pub summary: DeviceSummary,
}

/// All tokens found on the attached readers
pub struct DeviceRegistry<T> {
    devices: Vec<Device<T>>,
}

impl<T: Transport> DeviceRegistry<T> {
    /// Keep every transport whose token answers a status query.
    ///
    /// Tokens without the OTP applet are dropped quietly; other failures
    /// (transport faults, garbled replies) are dropped with a warning.
    pub fn probe<I>(transports: I) -> Self
    where
        I: IntoIterator<Item = (String, T)>,
    {
        let mut devices = Vec::new();

        for (reader, transport) in transports {
            let mut client = ProtocolClient::new(transport);

            match client.refresh_status() {
                Ok((identity, _)) => {
                    let serial = match client.fetch_serial() {
                        Ok(serial) => Some(serial),
                        Err(e) => {
                            log::debug!("No serial number from {}: {}", reader, e);
                            None
                        }
                    };
                    log::info!("Found Yubikey v{} in {}", identity, reader);
                    devices.push(Device {
                        reader,
                        serial,
                        client,
                    });
                }
                Err(ProtocolError::ApplicationNotSupported) => {
                    log::debug!("Skipping {}: OTP application not supported", reader);
                }
                Err(e) => {
                    log::warn!("Skipping {}: {}", reader, e);
                }
            }
        }

        Self { devices }
    }

    /// True when no reader holds an OTP-capable token
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Probed tokens in reader order
    pub fn devices(&self) -> &[Device<T>] {
        &self.devices
    }

    /// Mutable access, for commands that talk to every token
    pub fn devices_mut(&mut self) -> &mut [Device<T>] {
        &mut self.devices
    }

    /// Position of the target token: the one with `serial`, else the first
    pub fn position(&self, serial: Option<u32>) -> Option<usize> {
        match serial {
            Some(serial) => self.devices.iter().position(|d| d.serial == Some(serial)),
            None if self.devices.is_empty() => None,
            None => Some(0),
        }
    }

    /// Mutable handle on the token chosen by `position`
    pub fn select(&mut self, serial: Option<u32>) -> Option<&mut Device<T>> {
        let index = self.position(serial)?;
        self.devices.get_mut(index)
    }
}
