use anyhow::{Context as AnyhowContext, Result};
use pcsc::{Context, Protocols, Scope, ShareMode};
use std::ffi::CString;

use crate::core::transport::PcscTransport;

/// PCSC context owner, hands out one transport per inserted token
pub struct PcscReader {
    context: Context,
}

impl PcscReader {
    /// Establish a user-scope PCSC context
    pub fn new() -> Result<Self> {
        let context =
            Context::establish(Scope::User).context("Failed to establish PCSC context")?;

        Ok(Self { context })
    }

    /// List the names of all attached readers
    pub fn list_readers(&self) -> Result<Vec<String>> {
        let mut readers_buf = vec![0; 2048];
        let readers = match self.context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to list readers"),
        };

        Ok(readers
            .map(|name| name.to_string_lossy().to_string())
            .collect())
    }

    /// Open a T=1 channel to the card in `reader_name`
    pub fn connect(&self, reader_name: &str) -> Result<PcscTransport> {
        log::info!("Connecting to reader: {}", reader_name);

        let reader_cstr = CString::new(reader_name).context("Invalid reader name")?;
        let card = self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::T1)
            .with_context(|| format!("Failed to connect to reader: {}", reader_name))?;

        Ok(PcscTransport::new(card, reader_name))
    }

    /// Connect to every reader that holds a card.
    ///
    /// Readers that are empty or refuse the connection are skipped.
    pub fn connect_all(&self) -> Result<Vec<(String, PcscTransport)>> {
        let mut transports = Vec::new();

        for reader_name in self.list_readers()? {
            match self.connect(&reader_name) {
                Ok(transport) => transports.push((reader_name, transport)),
                Err(e) => log::debug!("Skipping reader {}: {:#}", reader_name, e),
            }
        }

        Ok(transports)
    }
}
