use serde::{Deserialize, Serialize};

/// Token usage triple kept for older clients that predate [`TokenRecord`].
///
/// `stream.turn_end` carries both; the record is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Raw token counts exactly as the provider reported them.
///
/// Semantics differ per provider: one reports only NEW input tokens per
/// turn, another reports the FULL context sent, a third omits cache
/// accounting entirely. [`crate::tokens::TokenRecord::computed`] is where
/// the uniform view lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    /// 5-minute-TTL cache writes, where the provider splits them.
    #[serde(default)]
    pub cache_creation_5m_tokens: u64,
    /// 1-hour-TTL cache writes, where the provider splits them.
    #[serde(default)]
    pub cache_creation_1h_tokens: u64,
}

impl RawTokenCounts {
    pub fn cache_creation_total(&self) -> u64 {
        self.cache_creation_5m_tokens + self.cache_creation_1h_tokens
    }
}

/// Normalized token fields, uniform across providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedTokens {
    /// Tokens newly sent this turn (not previously cached or in context).
    pub new_input_tokens: u64,
    pub output_tokens: u64,
    /// Total tokens occupying the context window after this turn.
    pub context_window_tokens: u64,
    /// The provider's raw input figure, whatever it meant.
    pub raw_input_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

/// Immutable per-turn token accounting snapshot.
///
/// Produced by the normalizer at turn end and never mutated afterwards;
/// corrections are expressed by later `turn.failed` or `stream.turn_end`
/// events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub source: RawTokenCounts,
    pub computed: ComputedTokens,
    pub meta: TokenRecordMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecordMeta {
    pub turn: u32,
    pub session_id: String,
    pub provider: String,
}

impl TokenRecord {
    /// The legacy triple derived from the normalized fields.
    pub fn as_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.computed.new_input_tokens,
            output_tokens: self.computed.output_tokens,
            total_tokens: self.computed.new_input_tokens + self.computed.output_tokens,
        }
    }
}
