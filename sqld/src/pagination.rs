//! Keyset pagination cursors and paged results.
//!
//! A cursor is the ordering-key value and the tie-break id of the last row
//! of a page, serialized as JSON and base64url-encoded:
//!
//! ```text
//! {"timestamp":"2024-01-15T10:30:00Z","id":42}  ->  eyJ0aW1lc3RhbXAiOi...
//! ```
//!
//! # Security Note
//!
//! Cursors use plain base64, **not encryption**. Clients can read and forge
//! them. Do not put sensitive data in the ordering value, and treat a decoded
//! cursor as untrusted input (it is only ever bound as a parameter).
//!
//! # Example
//!
//! ```
//! use sqld::{Cursor, Value, decode_cursor, encode_cursor};
//!
//! let token = encode_cursor(Value::from("2024-01-15"), 42).unwrap();
//! let cursor = decode_cursor(&token).unwrap().unwrap();
//! assert_eq!(cursor.id, 42);
//!
//! // an empty token means "first page"
//! assert_eq!(decode_cursor("").unwrap(), None);
//! ```

use crate::value::Value;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum allowed cursor size in bytes (4KB).
pub const MAX_CURSOR_SIZE: usize = 4 * 1024;

/// Decoder that accepts URL-safe tokens with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Cursor encoding and decoding errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CursorError {
    /// The token exceeds [`MAX_CURSOR_SIZE`].
    #[error("cursor exceeds maximum size ({size} > {max} bytes)")]
    TooLarge {
        /// Length of the rejected token.
        size: usize,
        /// The limit it exceeded.
        max: usize,
    },
    /// The token is not valid base64url.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    /// The decoded payload is not a cursor object, or has no ordering value.
    #[error("invalid cursor format: {0}")]
    InvalidFormat(#[source] serde_json::Error),
    /// The id is not a 32-bit integer.
    #[error("invalid cursor id: {0}")]
    InvalidId(String),
    /// The cursor could not be serialized.
    #[error("failed to encode cursor: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Position after the last row of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Value of the ordering column (usually a timestamp).
    pub value: Value,
    /// Tie-break id.
    pub id: i32,
}

#[derive(Serialize)]
struct CursorOut<'a> {
    timestamp: &'a Value,
    id: i32,
}

#[derive(Deserialize)]
struct CursorIn {
    timestamp: Option<Value>,
    id: serde_json::Number,
}

impl Cursor {
    /// Create a cursor.
    pub fn new(value: impl Into<Value>, id: i32) -> Self {
        Self {
            value: value.into(),
            id,
        }
    }

    /// Encode to an opaque base64url token.
    pub fn encode(&self) -> Result<String, CursorError> {
        let json = serde_json::to_vec(&CursorOut {
            timestamp: &self.value,
            id: self.id,
        })
        .map_err(CursorError::Encode)?;
        Ok(URL_SAFE.encode(json))
    }

    /// Decode a token. An empty token is "no cursor", not an error.
    pub fn decode(token: &str) -> Result<Option<Self>, CursorError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        // Check size before decoding to bound the work done on hostile input
        if token.len() > MAX_CURSOR_SIZE {
            return Err(CursorError::TooLarge {
                size: token.len(),
                max: MAX_CURSOR_SIZE,
            });
        }

        let bytes = URL_SAFE_LENIENT.decode(token)?;
        let raw: CursorIn = serde_json::from_slice(&bytes).map_err(CursorError::InvalidFormat)?;
        // a null ordering value would match no rows at all
        let Some(value) = raw.timestamp.filter(|v| !v.is_null()) else {
            return Err(CursorError::InvalidFormat(serde_json::Error::custom(
                "cursor has no ordering value",
            )));
        };
        let id = narrow_id(&raw.id)?;

        Ok(Some(Self { value, id }))
    }
}

/// Accept an integer, or a float with no fractional part, within `i32`.
fn narrow_id(n: &serde_json::Number) -> Result<i32, CursorError> {
    if let Some(i) = n.as_i64() {
        return i32::try_from(i).map_err(|_| CursorError::InvalidId(n.to_string()));
    }
    match n.as_f64() {
        #[allow(clippy::cast_possible_truncation)]
        Some(f) if f.fract() == 0.0 && f >= f64::from(i32::MIN) && f <= f64::from(i32::MAX) => {
            Ok(f as i32)
        },
        _ => Err(CursorError::InvalidId(n.to_string())),
    }
}

/// Encode `(value, id)` into a cursor token.
pub fn encode_cursor(value: impl Into<Value>, id: i32) -> Result<String, CursorError> {
    Cursor::new(value, id).encode()
}

/// Decode a cursor token. Empty input yields `Ok(None)`.
pub fn decode_cursor(token: &str) -> Result<Option<Cursor>, CursorError> {
    Cursor::decode(token)
}

// ═══════════════════════════════════════════════════════════════════════════
// PAGES
// ═══════════════════════════════════════════════════════════════════════════

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Rows of this page, at most `limit`.
    pub items: Vec<T>,
    /// Token for the next page, present when `has_more`.
    pub next_cursor: Option<String>,
    /// Whether another page follows.
    pub has_more: bool,
    /// Page size that was requested.
    pub limit: u32,
}

impl<T> Page<T> {
    /// Build a page from `limit + 1` fetched rows.
    ///
    /// The extra row only signals that another page exists; it is dropped
    /// and the cursor is taken from the last kept row. A `limit` of 0 keeps
    /// every row.
    pub fn from_overfetch(
        mut rows: Vec<T>,
        limit: u32,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Result<Self, CursorError> {
        let keep = usize::try_from(limit).unwrap_or(usize::MAX);
        let has_more = limit > 0 && rows.len() > keep;
        if has_more {
            rows.truncate(keep);
        }

        let next_cursor = if has_more {
            rows.last().map(|row| cursor_of(row).encode()).transpose()?
        } else {
            None
        };

        Ok(Self {
            items: rows,
            next_cursor,
            has_more,
            limit,
        })
    }
}
