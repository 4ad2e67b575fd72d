//! Centralized model pricing table
//!
//! Loaded from `~/.claude-station/pricing.toml` at runtime.
//! Falls back to compiled-in defaults if the file is missing.
//! Cache multipliers are fixed by the provider's billing model and are not
//! per-entry: reads bill at 0.1x input, writes at 1.25x (5-minute TTL) or
//! 2.0x (1-hour TTL).

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::api::{CacheTtl, TokenUsage};

/// Cache-read price multiplier relative to base input pricing.
pub const CACHE_READ_MULTIPLIER: f64 = 0.1;

/// A single model pricing entry.
/// `prefix` is matched as a substring of the model name (case-insensitive).
/// First match wins, so put more specific prefixes before general ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub prefix: String,
    pub input_per_m: f64,
    pub output_per_m: f64,
    pub context_window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PricingTable {
    #[serde(default)]
    pub entries: Vec<PricingEntry>,
}

impl PricingTable {
    fn find(&self, model: &str) -> Option<&PricingEntry> {
        let m = model.to_lowercase();
        self.entries
            .iter()
            .find(|entry| m.contains(&entry.prefix.to_lowercase()))
    }

    /// Pricing entry for a model. Unknown model IDs fall back to the Sonnet
    /// tier with a warning — pricing never fails a turn.
    pub fn lookup(&self, model: &str) -> &PricingEntry {
        if let Some(entry) = self.find(model) {
            return entry;
        }
        tracing::warn!(
            "unknown model '{}', falling back to Sonnet-tier pricing",
            model
        );
        self.entries
            .iter()
            .find(|e| e.prefix.contains("sonnet"))
            .or_else(|| self.entries.first())
            .expect("pricing table has no entries")
    }

    pub fn context_window(&self, model: &str) -> u32 {
        self.lookup(model).context_window
    }

    /// Cost in USD for one API response, from the provider's own counters.
    ///
    /// cost = (input * in + output * out
    ///       + cache_creation * in * W + cache_read * in * R) / 1M
    /// where R = 0.1 and W depends on the configured cache TTL.
    pub fn cost(&self, model: &str, usage: &TokenUsage, ttl: CacheTtl) -> f64 {
        let entry = self.lookup(model);
        let input = usage.input_tokens as f64 * entry.input_per_m;
        let output = usage.output_tokens as f64 * entry.output_per_m;
        let cache_write =
            usage.cache_creation_input_tokens as f64 * entry.input_per_m * ttl.write_multiplier();
        let cache_read =
            usage.cache_read_input_tokens as f64 * entry.input_per_m * CACHE_READ_MULTIPLIER;
        (input + output + cache_write + cache_read) / 1_000_000.0
    }

    /// Input-side cost for an estimated split of cached vs uncached tokens,
    /// assuming the cached prefix is read (the steady-state case).
    pub fn estimate_input_cost(
        &self,
        model: &str,
        cached_tokens: u64,
        uncached_tokens: u64,
    ) -> f64 {
        let entry = self.lookup(model);
        let cached = cached_tokens as f64 * entry.input_per_m * CACHE_READ_MULTIPLIER;
        let uncached = uncached_tokens as f64 * entry.input_per_m;
        (cached + uncached) / 1_000_000.0
    }

    /// Load from ~/.claude-station/pricing.toml.
    /// Returns compiled-in defaults if file is missing or unreadable.
    pub fn load() -> Self {
        let path = crate::config::station_home().join("pricing.toml");
        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(table) = toml::from_str::<PricingTable>(&content) {
                if !table.entries.is_empty() {
                    return table;
                }
            }
        }
        Self::defaults()
    }

    /// Compiled-in defaults — used as fallback if file missing.
    pub fn defaults() -> Self {
        toml::from_str(DEFAULT_PRICING_TOML).unwrap_or_default()
    }
}

/// Global pricing instance, initialized once per process.
/// The table is read-only after initialization.
static PRICING: OnceCell<PricingTable> = OnceCell::new();

pub fn pricing() -> &'static PricingTable {
    PRICING.get_or_init(PricingTable::load)
}

/// Advisory colour hint for cost display. Not a UI concern: the UI decides
/// what "green" looks like, the core decides where the thresholds are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostColor {
    Green,
    Yellow,
    Red,
}

/// Short display string plus colour hint for a USD amount.
pub fn format_cost(usd: f64) -> (String, CostColor) {
    let color = if usd < 0.01 {
        CostColor::Green
    } else if usd < 0.10 {
        CostColor::Yellow
    } else {
        CostColor::Red
    };
    let text = if usd < 0.01 {
        format!("${:.4}", usd)
    } else {
        format!("${:.2}", usd)
    };
    (text, color)
}

// ─────────────────────────────────────────────────────────────────────────────
// Default pricing table (compiled in as fallback)
// ─────────────────────────────────────────────────────────────────────────────
const DEFAULT_PRICING_TOML: &str = r#"
# ClaudeStation Pricing Table
# Edit this file to customize pricing or add new models.
#
# Rules:
#   - `prefix` is matched as a case-insensitive substring of the model name
#   - First match wins, so put specific prefixes before general ones
#   - Costs are per 1 million tokens (USD)
#   - Cache reads bill at 0.1x input; cache writes at 1.25x (5m) / 2.0x (1h)

entries = [
  # Claude Opus 4.x — $5/$25 per M tokens
  { prefix = "claude-opus-4",     input_per_m = 5.0,  output_per_m = 25.0, context_window = 200000 },
  # Claude Sonnet 4.x — $3/$15
  { prefix = "claude-sonnet-4",   input_per_m = 3.0,  output_per_m = 15.0, context_window = 200000 },
  # Claude 3.7 Sonnet — $3/$15
  { prefix = "claude-3-7-sonnet", input_per_m = 3.0,  output_per_m = 15.0, context_window = 200000 },
  # Claude Haiku 4.x — $1/$5
  { prefix = "claude-haiku-4",    input_per_m = 1.0,  output_per_m = 5.0,  context_window = 200000 },
  # Claude 3.5 Haiku — $0.80/$4
  { prefix = "claude-3-5-haiku",  input_per_m = 0.80, output_per_m = 4.0,  context_window = 200000 },
]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let table = PricingTable::defaults();
        assert!(!table.entries.is_empty());
    }

    #[test]
    fn test_cost_plain_input_output() {
        let table = PricingTable::defaults();
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            ..Default::default()
        };
        let cost = table.cost("claude-sonnet-4-6", &usage, CacheTtl::FiveMinutes);
        assert!((cost - 18.0).abs() < 1e-9); // $3 + $15
    }

    #[test]
    fn test_cost_cache_read_discount() {
        let table = PricingTable::defaults();
        let usage = TokenUsage {
            cache_read_input_tokens: 1_000_000,
            ..Default::default()
        };
        let cost = table.cost("claude-sonnet-4-6", &usage, CacheTtl::FiveMinutes);
        assert!((cost - 0.30).abs() < 1e-9); // $3 * 0.1
    }

    #[test]
    fn test_cost_cache_write_multipliers() {
        let table = PricingTable::defaults();
        let usage = TokenUsage {
            cache_creation_input_tokens: 1_000_000,
            ..Default::default()
        };
        let five = table.cost("claude-sonnet-4-6", &usage, CacheTtl::FiveMinutes);
        let hour = table.cost("claude-sonnet-4-6", &usage, CacheTtl::OneHour);
        assert!((five - 3.75).abs() < 1e-9); // $3 * 1.25
        assert!((hour - 6.0).abs() < 1e-9); // $3 * 2.0
    }

    #[test]
    fn test_unknown_model_falls_back_to_sonnet() {
        let table = PricingTable::defaults();
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            ..Default::default()
        };
        let cost = table.cost("some-unknown-model-xyz", &usage, CacheTtl::FiveMinutes);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_context_window() {
        let table = PricingTable::defaults();
        assert_eq!(table.context_window("claude-sonnet-4-6"), 200_000);
        assert_eq!(table.context_window("claude-haiku-4-5"), 200_000);
    }

    #[test]
    fn test_format_cost_thresholds() {
        assert_eq!(format_cost(0.004).1, CostColor::Green);
        assert_eq!(format_cost(0.05).1, CostColor::Yellow);
        assert_eq!(format_cost(0.50).1, CostColor::Red);
        assert_eq!(format_cost(0.004).0, "$0.0040");
        assert_eq!(format_cost(0.50).0, "$0.50");
    }
}
