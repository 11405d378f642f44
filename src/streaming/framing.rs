//! Array punctuation written around and between encoded items.

use bytes::Bytes;

/// The three byte sequences that turn a run of encoded items into one JSON
/// array. Cloning is a reference copy of static data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub open: Bytes,
    pub separator: Bytes,
    pub close: Bytes,
}

impl Framing {
    pub const fn compact() -> Self {
        Self {
            open: Bytes::from_static(b"["),
            separator: Bytes::from_static(b","),
            close: Bytes::from_static(b"]"),
        }
    }

    /// One item per line; only the punctuation changes, items are untouched.
    pub const fn pretty() -> Self {
        Self {
            open: Bytes::from_static(b"[\n"),
            separator: Bytes::from_static(b",\n"),
            close: Bytes::from_static(b"\n]\n"),
        }
    }

    pub fn new(pretty_print_newlines: bool) -> Self {
        if pretty_print_newlines {
            Self::pretty()
        } else {
            Self::compact()
        }
    }
}

impl Default for Framing {
    fn default() -> Self {
        Self::compact()
    }
}
