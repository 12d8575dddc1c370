//! Parsing and encoding of SCPI response payloads.
//!
//! Everything here is pure: bytes and strings in, values out. The session
//! layer handles transport and timeouts; drivers call these helpers (directly
//! or through `ScpiSession` convenience methods) to interpret replies.

use num_complex::Complex64;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{DeviceError, ScpiError};

/// IEEE 488.2 "not a number" sentinel. Instruments report this value (9.91E37)
/// for readings that are invalid or unavailable.
pub const NOT_A_NUMBER: f64 = 9.91e37;

/// True if `value` is the IEEE 488.2 NaN sentinel (or anything close enough
/// to it that it cannot be a real measurement).
pub fn is_nan_sentinel(value: f64) -> bool {
    value >= 9.9e37
}

/// Parsed `*IDN?` response.
///
/// The four comma-separated fields are manufacturer, model, serial number,
/// and firmware revision. Instruments that return fewer fields leave the
/// remainder empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Manufacturer name, e.g. `Keysight Technologies`.
    pub manufacturer: String,
    /// Model number, e.g. `N5245A`.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Firmware revision.
    pub firmware: String,
}

impl Identity {
    /// Parses the raw `*IDN?` line.
    pub fn parse(line: &str) -> Self {
        let mut fields = line.splitn(4, ',').map(|f| f.trim().to_string());
        Self {
            manufacturer: fields.next().unwrap_or_default(),
            model: fields.next().unwrap_or_default(),
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (serial {}, fw {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// Parses a single numeric response.
pub fn parse_f64(s: &str) -> Result<f64, ScpiError> {
    let trimmed = s.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| ScpiError::parse(s, "not a number"))
}

/// Parses a SCPI boolean (`0`/`1`/`ON`/`OFF`).
pub fn parse_bool(s: &str) -> Result<bool, ScpiError> {
    match s.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        _ => Err(ScpiError::parse(s, "not a boolean")),
    }
}

/// Parses a comma-separated list of numbers. An empty response yields an
/// empty vector.
pub fn parse_float_list(s: &str) -> Result<Vec<f64>, ScpiError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| ScpiError::parse(s, format!("bad list element {field:?}")))
        })
        .collect()
}

/// Reinterprets an interleaved `re, im, re, im, ...` sequence as complex
/// values. Fails on odd-length input.
pub fn floats_to_complex(values: &[f64]) -> Result<Vec<Complex64>, ScpiError> {
    if values.len() % 2 != 0 {
        return Err(ScpiError::parse(
            format!("{} values", values.len()),
            "interleaved complex data requires an even count",
        ));
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect())
}

/// Parses an interleaved complex list as returned by `CALC:DATA? SDATA`.
pub fn parse_complex_list(s: &str) -> Result<Vec<Complex64>, ScpiError> {
    floats_to_complex(&parse_float_list(s)?)
}

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    // Cannot fail: the pattern is a constant.
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"^\s*([+-]?\d+)\s*,\s*"(.*)"\s*$"#).unwrap()
});

/// Parses one `SYST:ERR?` reply, e.g. `-113,"Undefined header"`.
///
/// Unquoted messages are tolerated since some firmware omits the quotes.
pub fn parse_error_line(line: &str) -> Result<DeviceError, ScpiError> {
    if let Some(caps) = ERROR_LINE.captures(line) {
        let code = caps[1]
            .parse::<i32>()
            .map_err(|_| ScpiError::parse(line, "error code out of range"))?;
        return Ok(DeviceError {
            code,
            message: caps[2].to_string(),
        });
    }
    let (code, message) = line
        .split_once(',')
        .ok_or_else(|| ScpiError::parse(line, "missing comma in error line"))?;
    let code = code
        .trim()
        .parse::<i32>()
        .map_err(|_| ScpiError::parse(line, "bad error code"))?;
    Ok(DeviceError {
        code,
        message: message.trim().trim_matches('"').to_string(),
    })
}

/// Encodes a payload as an IEEE 488.2 definite-length block
/// (`#<digit count><length><payload>`).
pub fn encode_block(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().to_string();
    let mut out = Vec::with_capacity(2 + len.len() + payload.len());
    out.push(b'#');
    out.extend_from_slice(len.len().to_string().as_bytes());
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes a definite-length block at the start of `buf`, returning the
/// payload and how many bytes the block occupied.
pub fn decode_block(buf: &[u8]) -> Result<(&[u8], usize), ScpiError> {
    let render = || String::from_utf8_lossy(&buf[..buf.len().min(16)]).into_owned();
    if buf.first() != Some(&b'#') {
        return Err(ScpiError::parse(render(), "block must start with '#'"));
    }
    let digits = *buf
        .get(1)
        .ok_or_else(|| ScpiError::parse(render(), "truncated block header"))?;
    if !digits.is_ascii_digit() || digits == b'0' {
        return Err(ScpiError::parse(
            render(),
            "expected definite-length digit 1-9",
        ));
    }
    let digits = (digits - b'0') as usize;
    let header_end = 2 + digits;
    let len_field = buf
        .get(2..header_end)
        .ok_or_else(|| ScpiError::parse(render(), "truncated length field"))?;
    let len: usize = std::str::from_utf8(len_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScpiError::parse(render(), "non-numeric length field"))?;
    let payload = buf
        .get(header_end..header_end + len)
        .ok_or_else(|| ScpiError::parse(render(), "payload shorter than declared length"))?;
    Ok((payload, header_end + len))
}

/// Decodes a `REAL,64` little-endian payload into floats.
pub fn decode_f64_le(bytes: &[u8]) -> Result<Vec<f64>, ScpiError> {
    if bytes.len() % 8 != 0 {
        return Err(ScpiError::parse(
            format!("{} bytes", bytes.len()),
            "REAL,64 payload length must be a multiple of 8",
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}
