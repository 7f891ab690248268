//! The token normalizer.
//!
//! Providers disagree about what `input_tokens` means: Anthropic reports
//! only the NEW input for the turn (cache reads/writes split out), OpenAI-
//! compatible backends report the FULL context sent, and Gemini reports
//! full context with no cache accounting at all. This module folds each
//! shape into the uniform [`TokenRecord`].

use sb_domain::error::{Error, Result};
use sb_domain::tokens::{ComputedTokens, RawTokenCounts, TokenRecord, TokenRecordMeta};

use crate::traits::UsageSemantics;

/// Normalize one turn's raw counts.
///
/// `previous_context` is the context-window figure from the prior turn
/// (0 for the first), needed by full-context providers to derive the
/// per-turn delta.
pub fn normalize(
    raw: Option<RawTokenCounts>,
    semantics: UsageSemantics,
    previous_context: u64,
    session_id: &str,
    turn: u32,
    provider: &str,
) -> Result<TokenRecord> {
    let Some(raw) = raw else {
        return Err(Error::TokenExtraction {
            session_id: session_id.to_owned(),
            turn,
            message: format!("provider {provider} reported no usage"),
        });
    };

    let cache_creation = raw.cache_creation_total();
    let computed = match semantics {
        UsageSemantics::PerTurnInput => ComputedTokens {
            new_input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            context_window_tokens: raw.input_tokens + raw.cache_read_tokens + cache_creation,
            raw_input_tokens: raw.input_tokens,
            cache_read_tokens: raw.cache_read_tokens,
            cache_creation_tokens: cache_creation,
        },
        UsageSemantics::FullContext | UsageSemantics::NoCacheAccounting => {
            let new_input = raw.input_tokens.saturating_sub(previous_context);
            if raw.input_tokens < previous_context {
                // Context shrank (summarization upstream); clamp to zero
                // rather than failing the turn.
                tracing::warn!(
                    session_id,
                    turn,
                    raw_input = raw.input_tokens,
                    previous_context,
                    "context shrank between turns; newInputTokens clamped to 0"
                );
            }
            ComputedTokens {
                new_input_tokens: new_input,
                output_tokens: raw.output_tokens,
                context_window_tokens: raw.input_tokens,
                raw_input_tokens: raw.input_tokens,
                cache_read_tokens: raw.cache_read_tokens,
                cache_creation_tokens: cache_creation,
            }
        }
    };

    Ok(TokenRecord {
        source: raw,
        computed,
        meta: TokenRecordMeta {
            turn,
            session_id: session_id.to_owned(),
            provider: provider.to_owned(),
        },
    })
}
