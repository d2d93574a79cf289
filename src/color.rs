use image::Rgba;

use crate::error::{EngineError, Result};

/// Parse `#rgb` or `#rrggbb` (leading `#` optional) into an opaque colour.
pub fn parse_hex(s: &str) -> Result<Rgba<u8>> {
    let hex = s.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    let invalid = || EngineError::InvalidColor(s.to_string());

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16).ok_or_else(invalid)? as u8;
                out[i] = v * 17;
            }
            Ok(Rgba([out[0], out[1], out[2], 255]))
        }
        6 => {
            let val = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
            Ok(Rgba([(val >> 16) as u8, (val >> 8) as u8, val as u8, 255]))
        }
        _ => Err(invalid()),
    }
}

/// Lower-case `#rrggbb`; alpha is dropped.
pub fn to_hex(c: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_forms() {
        assert_eq!(parse_hex("#ff0000").unwrap(), Rgba([255, 0, 0, 255]));
        assert_eq!(parse_hex("00ff7f").unwrap(), Rgba([0, 255, 127, 255]));
        assert_eq!(parse_hex("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_hex("#1a2").unwrap(), Rgba([0x11, 0xaa, 0x22, 255]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_hex("").is_err());
        assert!(parse_hex("#12345").is_err());
        assert!(parse_hex("#gg0000").is_err());
        assert!(parse_hex("+12345").is_err());
    }

    #[test]
    fn formats_lowercase() {
        assert_eq!(to_hex(Rgba([0xAB, 0x01, 0xFF, 3])), "#ab01ff");
    }
}
