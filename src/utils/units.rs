use ethers::types::U256;

use crate::error::FetchError;

/// Parses a JSON-RPC hex quantity (`0x1a`, `0x0`, or the bare `0x` some
/// providers return for zero) without losing precision.
pub fn parse_hex_quantity(value: &str) -> Result<U256, FetchError> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| FetchError::InvalidResponse(format!("bad hex quantity {:?}: {}", value, e)))
}

pub fn parse_hex_u64(value: &str) -> Result<u64, FetchError> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| FetchError::InvalidResponse(format!("bad hex quantity {:?}: {}", value, e)))
}

/// Exact decimal rendering of `raw / 10^decimals`, trailing zeros trimmed.
pub fn format_units(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }

    let digits = raw.to_string();
    let scale = decimals as usize;
    let (whole, frac) = if digits.len() > scale {
        let split = digits.len() - scale;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = scale))
    };

    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, frac)
    }
}

pub fn units_to_f64(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals).parse().unwrap_or(0.0)
}
