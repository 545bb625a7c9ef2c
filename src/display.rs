//! Short forms and explorer links for console output.

use std::fmt::Display;

pub const EXPLORER_URL: &str = "https://testnet.monadscan.com";

/// `0x12345678...abcdef`
pub fn format_hash(hash: impl Display) -> String {
    shorten(&hash.to_string(), 8, 6)
}

/// `0x1234...abcd`
pub fn format_address(address: impl Display) -> String {
    shorten(&address.to_string(), 6, 4)
}

fn shorten(text: &str, head: usize, tail: usize) -> String {
    let count = text.chars().count();
    if count <= head + tail {
        return text.to_owned();
    }
    let start: String = text.chars().take(head).collect();
    let end: String = text.chars().skip(count - tail).collect();
    format!("{start}...{end}")
}

/// The call selector as `0x` + 8 hex digits. Plain `0x` for call-data
/// shorter than a selector.
pub fn method_id(input: &[u8]) -> String {
    match input.get(..4) {
        Some(selector) => format!("0x{}", hex::encode(selector)),
        None => String::from("0x"),
    }
}

pub fn tx_url(hash: impl Display) -> String {
    format!("{EXPLORER_URL}/tx/{hash}")
}

pub fn block_url(hash: impl Display) -> String {
    format!("{EXPLORER_URL}/block/{hash}")
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy::primitives::{
        Address,
        B256,
    };

    #[test]
    fn format_hash__keeps_head_and_tail() {
        let hash = B256::repeat_byte(0xab);
        assert_eq!(format_hash(hash), "0xababab...ababab");
        assert_eq!(format_hash("0x1234"), "0x1234");
    }

    #[test]
    fn format_address__keeps_six_and_four() {
        let address = Address::repeat_byte(0x11);
        assert_eq!(format_address(address), "0x1111...1111");
    }

    #[test]
    fn method_id__is_bare_prefix_for_short_input() {
        assert_eq!(method_id(&[0xa9, 0x05, 0x9c, 0xbb, 0x00]), "0xa9059cbb");
        assert_eq!(method_id(&[]), "0x");
        assert_eq!(method_id(&[1, 2, 3]), "0x");
    }

    #[test]
    fn tx_url__points_at_explorer() {
        assert_eq!(
            tx_url("0xabc"),
            "https://testnet.monadscan.com/tx/0xabc"
        );
        assert_eq!(
            block_url("0xdef"),
            "https://testnet.monadscan.com/block/0xdef"
        );
    }
}
