use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};

use crate::core::{
    client::{ProtocolClient, MAX_CHALLENGE_SIZE},
    reader::PcscReader,
    registry::{DeviceListing, DeviceRegistry},
    slot_config::{AccessCode, SlotConfig},
    transport::PcscTransport,
    utils::{format_hex, parse_hex},
};

#[derive(Parser)]
#[command(name = "yktool")]
#[command(about = "Read OTPs, compute HMACs and program slots of YubiKeys over PC/SC")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub options: GlobalOptions,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging (APDU traces)
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Args, Clone, Debug, Default)]
pub struct GlobalOptions {
    /// Treat standard input as hex text
    #[arg(long, global = true)]
    pub hex_in: bool,

    /// Write binary output as hex text
    #[arg(long, global = true)]
    pub hex_out: bool,

    /// Access code currently protecting the slot (6 bytes, hex)
    #[arg(long, global = true, value_name = "HEX")]
    pub acc_code: Option<String>,

    /// Access code to protect the slot with after programming (6 bytes, hex)
    #[arg(long, global = true, value_name = "HEX")]
    pub set_acc_code: Option<String>,

    /// Serial number of the Yubikey to use (default: first found)
    #[arg(short, long, global = true, value_name = "N")]
    pub serial: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached Yubikeys
    List {
        /// Print a JSON array instead of text
        #[arg(long)]
        json: bool,
    },

    /// Read a one-time password from a slot
    Otp {
        /// Slot number (1 or 2)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,
    },

    /// Compute an HMAC-SHA1 over the challenge read from stdin (1-64 bytes)
    Hmac {
        /// Slot number (1 or 2)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,
    },

    /// Write a new configuration to a slot
    Program {
        #[command(subcommand)]
        target: ProgramTarget,
    },
}

#[derive(Subcommand)]
pub enum ProgramTarget {
    /// HMAC-SHA1 challenge-response, 20-byte secret read from stdin
    Hmac {
        /// Slot number (1 or 2)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,

        /// Require a button press for each challenge
        #[arg(long)]
        touch: bool,
    },

    /// Yubico OTP
    Otp {
        /// Slot number (1 or 2)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,

        /// Public identity, up to 16 bytes (hex)
        #[arg(long, value_name = "HEX")]
        public_id: String,

        /// Private identity, 6 bytes (hex)
        #[arg(long, value_name = "HEX")]
        private_id: String,

        /// AES key, 16 bytes (hex)
        #[arg(long, value_name = "HEX")]
        key: String,
    },
}

pub fn run_cli() -> Result<()> {
    // Usage errors exit with 1 like every other failure; help and version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    let options = cli.options;
    match cli.command {
        Commands::List { json } => cmd_list(json),
        Commands::Otp { slot } => cmd_otp(&options, slot),
        Commands::Hmac { slot } => cmd_hmac(&options, slot),
        Commands::Program { target } => match target {
            ProgramTarget::Hmac { slot, touch } => cmd_program_hmac(&options, slot, touch),
            ProgramTarget::Otp {
                slot,
                public_id,
                private_id,
                key,
            } => cmd_program_otp(&options, slot, &public_id, &private_id, &key),
        },
    }
}

fn open_registry() -> Result<DeviceRegistry<PcscTransport>> {
    let reader = PcscReader::new().context("Failed to initialize PCSC")?;
    let transports = reader.connect_all()?;
    Ok(DeviceRegistry::probe(transports))
}

/// Run `op` against the token chosen by `--serial`, or the first one found
fn with_device<R>(
    serial: Option<u32>,
    op: impl FnOnce(&mut ProtocolClient<PcscTransport>) -> Result<R>,
) -> Result<R> {
    let mut registry = open_registry()?;
    if registry.is_empty() {
        bail!("No Yubikeys found");
    }

    let Some(device) = registry.select(serial) else {
        bail!(
            "No Yubikey with serial number {} found",
            serial.unwrap_or_default()
        );
    };
    log::info!("Using Yubikey in {}", device.reader);

    op(&mut device.client)
}

fn cmd_list(json: bool) -> Result<()> {
    let mut registry = open_registry()?;

    if json {
        let listing: Vec<DeviceListing> =
            registry.devices().iter().map(|d| d.listing()).collect();
        let out =
            serde_json::to_string_pretty(&listing).context("Failed to serialize device list")?;
        println!("{out}");
        return Ok(());
    }

    if registry.is_empty() {
        eprintln!("No Yubikeys found.");
        return Ok(());
    }

    eprintln!("Yubikeys available:");
    for device in registry.devices_mut() {
        println!("  - {}", device.client.describe());
    }

    Ok(())
}

fn cmd_otp(options: &GlobalOptions, slot: u8) -> Result<()> {
    let otp = with_device(options.serial, |client| Ok(client.fetch_otp(slot)?))?;
    println!("{otp}");
    Ok(())
}

fn cmd_hmac(options: &GlobalOptions, slot: u8) -> Result<()> {
    let challenge = read_input(io::stdin().lock(), options.hex_in)?;
    check_challenge(&challenge)?;

    let digest = with_device(options.serial, |client| {
        Ok(client.compute_hmac(slot, &challenge)?)
    })?;

    write_output(&mut io::stdout().lock(), &digest, options.hex_out)
}

fn cmd_program_hmac(options: &GlobalOptions, slot: u8, touch: bool) -> Result<()> {
    let secret = read_input(io::stdin().lock(), options.hex_in)?;
    let (new_code, current_code) = access_codes(options)?;

    let mut config = SlotConfig::hmac_sha1(&secret)?.require_touch(touch);
    if let Some(code) = new_code {
        config = config.with_access_code(code);
    }

    program_slot(options, slot, &config, current_code.as_ref())
}

fn cmd_program_otp(
    options: &GlobalOptions,
    slot: u8,
    public_id: &str,
    private_id: &str,
    key: &str,
) -> Result<()> {
    let public_id = parse_hex(public_id).context("Invalid public id")?;
    let private_id = parse_hex(private_id).context("Invalid private id")?;
    let key = parse_hex(key).context("Invalid AES key")?;
    let (new_code, current_code) = access_codes(options)?;

    let mut config = SlotConfig::yubico_otp(&public_id, &private_id, &key)?;
    if let Some(code) = new_code {
        config = config.with_access_code(code);
    }

    program_slot(options, slot, &config, current_code.as_ref())
}

fn program_slot(
    options: &GlobalOptions,
    slot: u8,
    config: &SlotConfig,
    current_code: Option<&AccessCode>,
) -> Result<()> {
    log::debug!("Programming slot {} with {:?}", slot, config);
    let payload = config.payload(current_code);

    with_device(options.serial, |client| {
        Ok(client.write_slot_config(slot, &payload)?)
    })?;

    eprintln!("Slot {slot} programmed.");
    Ok(())
}

/// Read all of `input`, decoding hex text when `hex_in` is set
pub fn read_input<R: Read>(mut input: R, hex_in: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    input
        .read_to_end(&mut buf)
        .context("Failed to read standard input")?;

    if hex_in {
        let text = String::from_utf8(buf).context("Hex input is not valid text")?;
        parse_hex(&text)
    } else {
        Ok(buf)
    }
}

pub fn check_challenge(challenge: &[u8]) -> Result<()> {
    if challenge.is_empty() {
        bail!("need at least 1 byte of input");
    }
    if challenge.len() > MAX_CHALLENGE_SIZE {
        bail!("hmac input is max of {} bytes", MAX_CHALLENGE_SIZE);
    }
    Ok(())
}

/// Parse `--set-acc-code` and `--acc-code`, in that order
pub fn access_codes(options: &GlobalOptions) -> Result<(Option<AccessCode>, Option<AccessCode>)> {
    let new_code = parse_access_code(options.set_acc_code.as_deref())
        .context("Invalid --set-acc-code")?;
    let current_code =
        parse_access_code(options.acc_code.as_deref()).context("Invalid --acc-code")?;
    Ok((new_code, current_code))
}

fn parse_access_code(hex_str: Option<&str>) -> Result<Option<AccessCode>> {
    match hex_str {
        Some(hex_str) => {
            let bytes = parse_hex(hex_str)?;
            Ok(Some(AccessCode::try_from(bytes.as_slice())?))
        }
        None => Ok(None),
    }
}

pub fn write_output<W: Write>(out: &mut W, data: &[u8], hex_out: bool) -> Result<()> {
    if hex_out {
        writeln!(out, "{}", format_hex(data))?;
    } else {
        out.write_all(data)?;
    }
    out.flush().context("Failed to write output")
}
