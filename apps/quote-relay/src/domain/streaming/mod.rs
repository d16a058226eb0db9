//! Streaming Types
//!
//! Client identity and the upstream tick representation.
//!
//! Ticks are kept as the verbatim JSON text received from the provider so
//! they can be forwarded to clients byte-for-byte. Only the routing symbol
//! is extracted.

use std::collections::HashMap;
use std::fmt;

use serde_json::value::RawValue;
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// A symbol string (stock ticker).
pub type Symbol = String;

/// Unique identifier for a downstream client, generated at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// Errors raised while decoding an upstream frame.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// JSON parsing failed.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was neither a JSON object nor a JSON array.
    #[error("invalid tick frame: {0}")]
    InvalidFormat(String),
}

/// Routing keys in priority order.
///
/// Providers conventionally use the abbreviated `s` key; `symbol` is
/// accepted as a fallback.
const SYMBOL_KEYS: [&str; 2] = ["s", "symbol"];

/// First routing key holding a string value.
///
/// Fields are read as raw JSON, so a non-string `s` falls through to
/// `symbol`. Duplicate keys keep the last occurrence.
fn routing_symbol(raw: &RawValue) -> Option<Symbol> {
    let fields: HashMap<String, &RawValue> = serde_json::from_str(raw.get()).ok()?;
    SYMBOL_KEYS.iter().find_map(|key| {
        fields
            .get(*key)
            .and_then(|value| serde_json::from_str::<Symbol>(value.get()).ok())
    })
}

/// A single upstream quote update.
#[derive(Debug, Clone)]
pub struct Tick {
    symbol: Option<Symbol>,
    raw: Box<RawValue>,
}

impl Tick {
    /// Decode one upstream text frame into ticks.
    ///
    /// A frame is either a single JSON object or a JSON array of objects.
    /// Elements that are not objects, or carry no string symbol, decode
    /// into ticks without a symbol and are dropped by the router.
    ///
    /// # Errors
    ///
    /// Returns `TickError` if the frame is not valid JSON or is a bare
    /// scalar.
    pub fn parse_frame(text: &str) -> Result<Vec<Self>, TickError> {
        let trimmed = text.trim();

        if trimmed.starts_with('[') {
            let elements: Vec<Box<RawValue>> = serde_json::from_str(trimmed)?;
            Ok(elements.into_iter().map(Self::from_raw).collect())
        } else if trimmed.starts_with('{') {
            let raw: Box<RawValue> = serde_json::from_str(trimmed)?;
            Ok(vec![Self::from_raw(raw)])
        } else {
            Err(TickError::InvalidFormat(format!(
                "expected JSON array or object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )))
        }
    }

    fn from_raw(raw: Box<RawValue>) -> Self {
        let symbol = routing_symbol(&raw);
        Self { symbol, raw }
    }

    /// The routing symbol, if the tick carries one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// The verbatim JSON payload as received from upstream.
    #[must_use]
    pub fn payload(&self) -> &str {
        self.raw.get()
    }
}

// =============================================================================
// Tests
// =============================================================================
