//! AT command parser for the RFCOMM control channel

use thiserror::Error;

/// Longest accepted command value, in bytes
const MAX_VALUE_LEN: usize = 63;

/// AT command flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtKind {
    /// `AT<CMD>=<value>`
    Set,
    /// `AT<CMD>?`
    Get,
    /// `AT<CMD>=?`
    Test,
}

/// A parsed AT command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    /// Command flavor
    pub kind: AtKind,
    /// Command name, e.g. `+BRSF`
    pub name: String,
    /// Value for SET commands, empty otherwise
    pub value: String,
}

/// AT parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtParseError {
    /// Input does not start with `AT`
    #[error("missing AT prefix")]
    MissingPrefix,
    /// Input carries neither `=` nor `?`
    #[error("malformed AT command")]
    Malformed,
}

/// Parse one AT command line.
///
/// Surrounding whitespace (including the `\r` terminator) is ignored and
/// the `AT` prefix is matched case-insensitively. SET values are bounded
/// to 63 bytes.
///
/// # Errors
///
/// [`AtParseError`] for input without the prefix or without any of the
/// `=`, `=?` or `?` forms.
pub fn parse(input: &str) -> Result<AtCommand, AtParseError> {
    let input = input.trim();
    match input.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("at") => {}
        _ => return Err(AtParseError::MissingPrefix),
    }
    let body = &input[2..];

    if let Some(equals) = body.find('=') {
        let name = body[..equals].to_string();
        let rest = &body[equals + 1..];
        if rest.starts_with('?') {
            return Ok(AtCommand {
                kind: AtKind::Test,
                name,
                value: String::new(),
            });
        }
        let mut value = rest.to_string();
        if value.len() > MAX_VALUE_LEN {
            let mut end = MAX_VALUE_LEN;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            value.truncate(end);
        }
        return Ok(AtCommand {
            kind: AtKind::Set,
            name,
            value,
        });
    }

    match body.find('?') {
        Some(question) => Ok(AtCommand {
            kind: AtKind::Get,
            name: body[..question].to_string(),
            value: String::new(),
        }),
        None => Err(AtParseError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_set_command() {
        let cmd = parse("AT+BRSF=768\r").unwrap();
        assert_eq!(cmd.kind, AtKind::Set);
        assert_eq!(cmd.name, "+BRSF");
        assert_eq!(cmd.value, "768");
    }

    #[test]
    fn parses_test_command() {
        let cmd = parse("AT+CIND=?\r").unwrap();
        assert_eq!(cmd.kind, AtKind::Test);
        assert_eq!(cmd.name, "+CIND");
        assert_eq!(cmd.value, "");
    }

    #[test]
    fn parses_get_command() {
        let cmd = parse("AT+CIND?\r").unwrap();
        assert_eq!(cmd.kind, AtKind::Get);
        assert_eq!(cmd.name, "+CIND");
    }

    #[test]
    fn prefix_is_case_insensitive() {
        assert_eq!(parse("at+vgm=10\r").unwrap().name, "+VGM".to_lowercase());
        assert!(parse("At+VGS=7").is_ok());
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let cmd = parse("  AT+VGS=9\r\n ").unwrap();
        assert_eq!(cmd.kind, AtKind::Set);
        assert_eq!(cmd.value, "9");
    }

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(parse("+BRSF=768"), Err(AtParseError::MissingPrefix));
        assert_eq!(parse(""), Err(AtParseError::MissingPrefix));
    }

    #[test]
    fn rejects_bare_command() {
        assert_eq!(parse("AT+BRSF"), Err(AtParseError::Malformed));
    }

    #[test]
    fn bounds_long_values() {
        let long = format!("AT+TEST={}", "x".repeat(200));
        let cmd = parse(&long).unwrap();
        assert_eq!(cmd.value.len(), 63);
    }

    proptest! {
        #[test]
        fn valid_inputs_round_trip(
            name in "[+A-Z]{1,8}",
            value in "[0-9,]{0,20}",
        ) {
            let set = parse(&format!("AT{name}={value}\r")).unwrap();
            prop_assert_eq!(set.kind, AtKind::Set);
            prop_assert_eq!(&set.name, &name);
            prop_assert_eq!(&set.value, &value);

            let test = parse(&format!("AT{name}=?\r")).unwrap();
            prop_assert_eq!(test.kind, AtKind::Test);
            prop_assert_eq!(&test.name, &name);

            let get = parse(&format!("AT{name}?\r")).unwrap();
            prop_assert_eq!(get.kind, AtKind::Get);
            prop_assert_eq!(&get.name, &name);
        }

        #[test]
        fn garbage_never_panics(input in ".{0,80}") {
            let _ = parse(&input);
        }
    }
}
