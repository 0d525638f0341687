//! Wire-token and argument-blob encoding.
//!
//! Tokens use the surrogate strategy: the token is the store key rendered as
//! a lowercase hyphenated UUID. That is always 36 characters, which fits the
//! platform's 100-character component field, and uses only `[0-9a-f-]`.
//!
//! Argument lists are stored as a length-prefixed sequence,
//! `<byte-len>:<bytes>,` per argument, so no argument content can be
//! mistaken for a separator.

use uuid::Uuid;

use super::ComponentIdError;

/// Length of every wire token produced by [`encode_token`].
pub const TOKEN_LEN: usize = 36;

pub fn encode_token(key: &Uuid) -> String {
    key.hyphenated().to_string()
}

/// Parse a wire token back into its store key.
///
/// Only the exact form produced by [`encode_token`] is accepted; other UUID
/// spellings (braced, URN, simple) are rejected as malformed.
pub fn decode_token(token: &str) -> Result<Uuid, ComponentIdError> {
    let well_formed = token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b == b'-' || b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(ComponentIdError::Malformed(truncate_for_log(token)));
    }
    Uuid::try_parse(token).map_err(|_| ComponentIdError::Malformed(truncate_for_log(token)))
}

/// Byte length of `args` once encoded by [`encode_args`].
pub fn encoded_args_len(args: &[String]) -> usize {
    args.iter()
        .map(|a| decimal_digits(a.len()) + 1 + a.len() + 1)
        .sum()
}

pub fn encode_args(args: &[String]) -> String {
    let mut out = String::with_capacity(encoded_args_len(args));
    for arg in args {
        out.push_str(&arg.len().to_string());
        out.push(':');
        out.push_str(arg);
        out.push(',');
    }
    out
}

pub fn decode_args(blob: &str) -> Result<Vec<String>, ComponentIdError> {
    let mut args = Vec::new();
    let mut rest = blob;
    while !rest.is_empty() {
        let (len, tail) = rest
            .split_once(':')
            .ok_or_else(|| ComponentIdError::Malformed("args blob: missing length".into()))?;
        let len: usize = len
            .parse()
            .map_err(|_| ComponentIdError::Malformed(format!("args blob: bad length {len:?}")))?;
        let arg = tail
            .get(..len)
            .ok_or_else(|| ComponentIdError::Malformed("args blob: truncated argument".into()))?;
        rest = tail[len..]
            .strip_prefix(',')
            .ok_or_else(|| ComponentIdError::Malformed("args blob: missing terminator".into()))?;
        args.push(arg.to_string());
    }
    Ok(args)
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn truncate_for_log(token: &str) -> String {
    token.chars().take(TOKEN_LEN + 4).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn token_is_36_printable_chars() {
        let token = encode_token(&Uuid::new_v4());
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
        assert_eq!(decode_token(&token).unwrap().hyphenated().to_string(), token);
    }

    #[test]
    fn garbage_tokens_are_malformed() {
        for bad in [
            "!!garbage!!",
            "",
            "h:u42:yes",
            "4F1C2D3E-0000-4000-8000-000000000000",
            "{4f1c2d3e-0000-4000-8000-000000000000}",
            "4f1c2d3e000040008000000000000000",
            "4f1c2d3e-0000-4000-8000-00000000000g",
        ] {
            assert!(
                matches!(decode_token(bad), Err(ComponentIdError::Malformed(_))),
                "expected {bad:?} to be malformed"
            );
        }
    }

    #[test]
    fn args_with_separator_characters_survive() {
        let args = strings(&["3:abc,", ",", ":", "", "ünïcödé", "a,b:c"]);
        let blob = encode_args(&args);
        assert_eq!(blob.len(), encoded_args_len(&args));
        assert_eq!(decode_args(&blob).unwrap(), args);
    }

    #[test]
    fn empty_arg_list_encodes_to_empty_blob() {
        assert_eq!(encode_args(&[]), "");
        assert_eq!(decode_args("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn corrupt_blobs_are_rejected() {
        for bad in ["3:ab", "x:abc,", "3:abc", "3:abc;", "abc"] {
            assert!(decode_args(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn length_counts_multibyte_arguments_in_bytes() {
        let args = strings(&["é"]);
        assert_eq!(encode_args(&args), "2:é,");
        assert_eq!(encoded_args_len(&args), 5);
    }

    proptest! {
        #[test]
        fn prop_args_blob_round_trips(args in proptest::collection::vec(".*", 0..8)) {
            let blob = encode_args(&args);
            prop_assert_eq!(blob.len(), encoded_args_len(&args));
            prop_assert_eq!(decode_args(&blob).unwrap(), args);
        }
    }
}
