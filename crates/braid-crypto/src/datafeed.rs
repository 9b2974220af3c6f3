use braid_core::constants::UPGRADE_MCI_DATAFEED_PRECISION;
use braid_core::types::{Address, Mci};
use braid_core::unit::DataFeedValue;

/// Encode a double so byte-wise lexicographic order equals numeric order:
/// flip the sign bit for positives, all bits for negatives, then hex the
/// big-endian result.
pub fn encode_double_lexicographic(value: f64) -> String {
    let bits = value.to_bits();
    let flipped = if value.is_sign_negative() {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    };
    hex::encode(flipped.to_be_bytes())
}

/// Count significant decimal digits in the shortest round-trip
/// representation of a double.
fn mantissa_digits(value: f64) -> usize {
    let repr = format!("{value}");
    let mantissa: &str = repr
        .split(['e', 'E'])
        .next()
        .unwrap_or(&repr);
    mantissa
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .trim_start_matches('0')
        .len()
}

/// Numeric index encoding for a data-feed value, or None when the value is
/// not numerically indexable under the precision rule active at `mci` —
/// the rule of the feed unit's own MCI, not the current one.
pub fn encode_numeric(value: &DataFeedValue, mci: Mci) -> Option<String> {
    let number = match value {
        DataFeedValue::Number(n) => n.as_f64()?,
        DataFeedValue::Text(s) => s.parse::<f64>().ok()?,
    };
    if !number.is_finite() {
        return None;
    }
    if mci < UPGRADE_MCI_DATAFEED_PRECISION && mantissa_digits(number) > 15 {
        return None;
    }
    Some(encode_double_lexicographic(number))
}

/// KV key for a numeric data-feed index entry:
/// `df\n<feed>\nn\n<encoded>\n<oracle>`.
pub fn numeric_feed_key(feed_name: &str, encoded: &str, oracle: &Address) -> Vec<u8> {
    format!("df\n{feed_name}\nn\n{encoded}\n{oracle}").into_bytes()
}

/// KV key for a string data-feed index entry:
/// `df\n<feed>\ns\n<value>\n<oracle>`.
pub fn string_feed_key(feed_name: &str, value: &str, oracle: &Address) -> Vec<u8> {
    format!("df\n{feed_name}\ns\n{value}\n{oracle}").into_bytes()
}

/// Prefix for scanning every entry of one feed kind.
pub fn feed_scan_prefix(feed_name: &str, numeric: bool) -> Vec<u8> {
    let kind = if numeric { 'n' } else { 's' };
    format!("df\n{feed_name}\n{kind}\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_sorts_like_numbers() {
        // ascending numeric order must already be ascending byte order
        let values = [-10.5_f64, -1.0, 0.0, 0.25, 1.0, 42.0, 1e9];
        let encoded: Vec<String> =
            values.iter().map(|v| encode_double_lexicographic(*v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn precision_rule_applies_before_upgrade() {
        let sixteen_digits = DataFeedValue::Number(
            serde_json::Number::from_f64(1234567890.123456).unwrap(),
        );
        assert!(encode_numeric(&sixteen_digits, 0).is_none());
        assert!(encode_numeric(&sixteen_digits, UPGRADE_MCI_DATAFEED_PRECISION).is_some());
    }

    #[test]
    fn short_mantissa_indexed_everywhere() {
        let v = DataFeedValue::Number(serde_json::Number::from(42));
        assert!(encode_numeric(&v, 0).is_some());
    }
}
