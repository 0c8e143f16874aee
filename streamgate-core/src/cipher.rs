//! Decoder for the positional cipher used by the secondary provider's
//! obfuscated player script.
//!
//! The script encodes each character of the playback URL as a run of symbols
//! drawn from a custom alphabet. A run is read as a number in the given base
//! (symbol position in the alphabet = digit value), then reduced by a fixed
//! offset to recover the character code. Runs are separated by a delimiter
//! character that never appears in the alphabet.

/// Decode one cipher payload. Returns `None` on any malformed input: a
/// symbol outside the alphabet, a value overflowing, or a code point that is
/// not a valid character.
pub fn decode(alphabet: &str, base: u32, offset: u32, delimiter: char, payload: &str) -> Option<String> {
    if base < 2 || alphabet.chars().count() < base as usize {
        return None;
    }
    let digits: Vec<char> = alphabet.chars().take(base as usize).collect();

    let mut out = String::new();
    for run in payload.split(delimiter) {
        if run.is_empty() {
            continue;
        }
        let mut value: u32 = 0;
        for symbol in run.chars() {
            let digit = digits.iter().position(|&d| d == symbol)? as u32;
            value = value.checked_mul(base)?.checked_add(digit)?;
        }
        let code = value.checked_sub(offset)?;
        out.push(char::from_u32(code)?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a string the way the obfuscated script does, for round-trips.
    fn encode(alphabet: &str, base: u32, offset: u32, delimiter: char, input: &str) -> String {
        let digits: Vec<char> = alphabet.chars().take(base as usize).collect();
        let mut runs = Vec::new();
        for ch in input.chars() {
            let mut value = ch as u32 + offset;
            let mut run = String::new();
            if value == 0 {
                run.push(digits[0]);
            }
            while value > 0 {
                run.insert(0, digits[(value % base) as usize]);
                value /= base;
            }
            runs.push(run);
        }
        runs.join(&delimiter.to_string())
    }

    #[test]
    fn decodes_known_payload() {
        // "hi" with alphabet 0-9, base 10, offset 0: 'h' = 104, 'i' = 105
        assert_eq!(
            decode("0123456789", 10, 0, '.', "104.105"),
            Some("hi".to_string())
        );
    }

    #[test]
    fn round_trips_a_url() {
        let alphabet = "KjMnLpQrStUvWxYz";
        let url = "https://cdn.example.net/live/chan42/mono.m3u8?token=abc123";
        let payload = encode(alphabet, 16, 57, '=', url);
        assert_eq!(decode(alphabet, 16, 57, '=', &payload), Some(url.to_string()));
    }

    #[test]
    fn rejects_symbol_outside_alphabet() {
        assert_eq!(decode("0123456789", 10, 0, '.', "10!"), None);
    }

    #[test]
    fn rejects_code_below_offset() {
        // 5 - 100 underflows: malformed payload
        assert_eq!(decode("0123456789", 10, 100, '.', "5"), None);
    }

    #[test]
    fn rejects_base_larger_than_alphabet() {
        assert_eq!(decode("01", 10, 0, '.', "1"), None);
    }

    #[test]
    fn empty_runs_are_skipped() {
        assert_eq!(
            decode("0123456789", 10, 0, '.', "104..105"),
            Some("hi".to_string())
        );
    }
}
