// src/breaker/signature.rs

//! Content fingerprints and error signatures.

use std::fmt;
use std::sync::OnceLock;

use blake3::Hasher;
use regex::Regex;
use tracing::warn;

/// Longest signature kept, in characters.
pub const MAX_SIGNATURE_LEN: usize = 200;

/// Hex blake3 digest of `bytes`, used as an attempt's content hash.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// Normalized error message.
///
/// Two failures that differ only in addresses, line numbers, counters or
/// temp paths get the same signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    pub fn from_message(message: &str) -> Self {
        let mut text = message.to_string();
        for (re, replacement) in normalizers() {
            text = re.replace_all(&text, *replacement).into_owned();
        }
        let text = text.trim();
        Self(text.chars().take(MAX_SIGNATURE_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ErrorSignature> for String {
    fn from(sig: ErrorSignature) -> Self {
        sig.0
    }
}

// Applied in order: hex before numbers, paths before numbers, whitespace last.
const PATTERNS: &[(&str, &str)] = &[
    (r"0x[0-9a-fA-F]+", "0x?"),
    (r#""[^"]*[/\\][^"]*""#, "<path>"),
    (r"'[^']*[/\\][^']*'", "<path>"),
    (r"(?:/[\w.\-]+){2,}/?", "<path>"),
    (r"\d+", "N"),
    (r"\s+", " "),
];

fn normalizers() -> &'static [(Regex, &'static str)] {
    static NORMALIZERS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    NORMALIZERS.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(re) => Some((re, *replacement)),
                Err(e) => {
                    warn!(%pattern, error = %e, "invalid signature pattern; ignoring");
                    None
                }
            })
            .collect()
    })
}
