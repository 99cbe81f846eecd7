use lazy_static::lazy_static;
use regex::Regex;

/// Recorded when a MAIL/RCPT line carries no usable address.
pub const DEFAULT_ADDR: &str = "invalid@addr";

lazy_static! {
    static ref ENVELOPE: Regex =
        Regex::new(r"(?i)\b(?:MAIL|RCPT)\s+(?:FROM|TO):.*<([^>]+)>").unwrap();
    static ref UNSAFE_RUN: Regex = Regex::new(r"[^a-zA-Z0-9@]+").unwrap();
}

/// Extracts the envelope address from a `MAIL FROM:<...>` or `RCPT TO:<...>`
/// line. When several bracket groups follow the keyword, the last non-empty
/// one is taken. Every run of characters outside `[A-Za-z0-9@]` collapses to
/// a single `.`, so the result is safe to embed in a file name.
///
/// Anything that does not look like an envelope address yields
/// [`DEFAULT_ADDR`] instead of an error.
pub fn sanitize_addr(line: &str) -> String {
    let inner = match ENVELOPE.captures(line).and_then(|caps| caps.get(1)) {
        Some(m) => m.as_str(),
        None => return DEFAULT_ADDR.to_string(),
    };

    UNSAFE_RUN.replace_all(inner, ".").into_owned()
}
