//! IPv4 address and netmask helpers

use super::error::{InterfaceError, InterfaceResult};
use std::net::Ipv4Addr;

/// Parse a dotted-quad address, naming `field` in the error
pub fn parse_ipv4(field: &str, value: &str) -> InterfaceResult<Ipv4Addr> {
    value.trim().parse().map_err(|_| InterfaceError::InvalidValue {
        field: field.to_string(),
        detail: format!("'{}' is not an IPv4 address", value),
    })
}

/// Prefix length of a contiguous netmask such as `255.255.255.0`
pub fn mask_to_prefix(mask: &str) -> InterfaceResult<u8> {
    let bits = u32::from(parse_ipv4("mask", mask)?);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return Err(InterfaceError::InvalidValue {
            field: "mask".to_string(),
            detail: format!("'{}' is not a contiguous netmask", mask),
        });
    }
    Ok(prefix as u8)
}

/// Dotted-quad netmask for a prefix length, `None` if above 32
pub fn prefix_to_mask(prefix: u8) -> Option<String> {
    if prefix > 32 {
        return None;
    }
    let bits = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Some(Ipv4Addr::from(bits).to_string())
}
