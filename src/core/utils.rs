use anyhow::{bail, Context, Result};

/// Parse a hex string into bytes
/// Supports various formats:
/// - "0102030A" (pure hex)
/// - "01 02 03 0A" (space-separated)
/// - "0x01,0x02,0x03,0x0A" (0x prefix with commas)
/// - "01:02:03:0A" (colon-separated)
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned = clean_hex_string(hex_str);

    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    if cleaned.len() % 2 != 0 {
        bail!(
            "Hex string must have even number of characters: '{}'",
            hex_str.trim()
        );
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{}'", hex_str.trim()))
}

/// Strip separators, `0x` prefixes and whitespace
fn clean_hex_string(hex_str: &str) -> String {
    hex_str
        .trim()
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | ':' | '-'))
        .collect()
}

/// Format bytes as a hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as a hex string with spaces
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable meaning of the status words the OTP applet returns
pub fn describe_status_word(sw: u16) -> String {
    match sw {
        0x9000 => "Success".to_string(),
        0x6700 => "Error: Wrong length".to_string(),
        0x6982 => "Error: Security status not satisfied".to_string(),
        0x6985 => "Error: Conditions of use not satisfied".to_string(),
        0x6A80 => "Error: Incorrect parameters in data field".to_string(),
        0x6A82 => "Error: File not found".to_string(),
        0x6A86 => "Error: Incorrect parameters P1-P2".to_string(),
        0x6D00 => "Error: Instruction code not supported or invalid".to_string(),
        0x6E00 => "Error: Class not supported".to_string(),
        0x6F00 => "Error: No precise diagnosis".to_string(),
        sw => format!("Unknown status: {:02X} {:02X}", sw >> 8, sw & 0xFF),
    }
}
