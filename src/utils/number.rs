// src/utils/number.rs
// Numeric operand parsing with C `strtoul(.., 0)` base detection

/// Parse the longest unsigned number at the start of `s`.
///
/// `0x`/`0X` selects hexadecimal, a leading `0` octal, anything else
/// decimal. Returns the value and the unparsed remainder, or `None` when no
/// digit was consumed or the value overflows `u64`.
pub fn parse_unsigned_prefix(s: &str) -> Option<(u64, &str)> {
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_hexdigit()));

    let (radix, digits) = match hex {
        Some(rest) => (16, rest),
        None if s.starts_with('0') => (8, s),
        None => (10, s),
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value = u64::from_str_radix(&digits[..end], radix).ok()?;
    Some((value, &digits[end..]))
}

/// Parse a whole token as an unsigned number
pub fn parse_unsigned(s: &str) -> Option<u64> {
    match parse_unsigned_prefix(s)? {
        (value, "") => Some(value),
        _ => None,
    }
}

/// Parse a whole token and require `min <= value <= max`
pub fn parse_bounded(s: &str, min: u64, max: u64) -> Option<u64> {
    parse_unsigned(s).filter(|v| (min..=max).contains(v))
}
