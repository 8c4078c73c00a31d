//! Cost Ledger (C9): per-category running totals with model-specific
//! pricing (§4.9). Pricing lookup adapts the same prefix-matching,
//! cached-input-tier pattern used for LLM cost estimation elsewhere in
//! this codebase's lineage.

use std::collections::BTreeMap;

struct ModelPricing {
    input: f64,
    output: f64,
    cached_input: f64,
}

/// Matches on the model portion (after a `provider/` prefix) against known
/// family prefixes; unrecognized models fall back to a conservative
/// default tier with a logged warning.
fn lookup_pricing(model_name: &str) -> ModelPricing {
    let model = model_name.split_once('/').map(|(_, m)| m).unwrap_or(model_name);
    let per_m = |price: f64| price / 1_000_000.0;

    match model {
        m if m.starts_with("claude-opus-4") || m.starts_with("claude-3-opus") => ModelPricing {
            input: per_m(15.0),
            output: per_m(75.0),
            cached_input: per_m(1.5),
        },
        m if m.starts_with("claude-sonnet-4") || m.starts_with("claude-3-5-sonnet") => {
            ModelPricing {
                input: per_m(3.0),
                output: per_m(15.0),
                cached_input: per_m(0.30),
            }
        }
        m if m.starts_with("claude-3-5-haiku") || m.starts_with("claude-haiku-4") => {
            ModelPricing {
                input: per_m(0.80),
                output: per_m(4.0),
                cached_input: per_m(0.08),
            }
        }
        m if m.starts_with("gpt-4o-mini") => ModelPricing {
            input: per_m(0.15),
            output: per_m(0.60),
            cached_input: per_m(0.075),
        },
        m if m.starts_with("gpt-4o") => ModelPricing {
            input: per_m(2.50),
            output: per_m(10.0),
            cached_input: per_m(1.25),
        },
        _ => {
            tracing::warn!(model = %model_name, "unrecognized model, using default pricing tier");
            ModelPricing {
                input: per_m(3.0),
                output: per_m(15.0),
                cached_input: per_m(0.30),
            }
        }
    }
}

fn estimate_cost(model_name: &str, input_tokens: u64, output_tokens: u64, cached_input_tokens: u64) -> f64 {
    let pricing = lookup_pricing(model_name);
    let uncached_input = input_tokens.saturating_sub(cached_input_tokens);
    (uncached_input as f64 * pricing.input)
        + (output_tokens as f64 * pricing.output)
        + (cached_input_tokens as f64 * pricing.cached_input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Title,
    Plan,
    Implement,
    SelfReview,
    Tests,
    PrBody,
    SearchContext,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub total: f64,
    pub breakdown: BTreeMap<Category, f64>,
}

/// Invariant: `total == Σ breakdown.values()`, enforced by construction —
/// every mutation goes through `add`, never a direct field write.
#[derive(Debug, Default)]
pub struct CostLedger {
    breakdown: BTreeMap<Category, f64>,
    total: f64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, category: Category, input_tokens: u64, output_tokens: u64, model: &str) {
        let cost = estimate_cost(model, input_tokens, output_tokens, 0);
        *self.breakdown.entry(category).or_insert(0.0) += cost;
        self.total += cost;
    }

    pub fn add_with_cache(
        &mut self,
        category: Category,
        input_tokens: u64,
        output_tokens: u64,
        cached_input_tokens: u64,
        model: &str,
    ) {
        let cost = estimate_cost(model, input_tokens, output_tokens, cached_input_tokens);
        *self.breakdown.entry(category).or_insert(0.0) += cost;
        self.total += cost;
    }

    pub fn report(&self) -> Report {
        Report {
            total: self.total,
            breakdown: self.breakdown.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_matches_sum_of_categories() {
        let mut ledger = CostLedger::new();
        ledger.add(Category::Plan, 1000, 200, "claude-sonnet-4-20250514");
        ledger.add(Category::Implement, 5000, 3000, "claude-sonnet-4-20250514");
        ledger.add(Category::Tests, 800, 400, "claude-opus-4-20250514");

        let report = ledger.report();
        let summed: f64 = report.breakdown.values().sum();
        assert!((report.total - summed).abs() < 1e-9);
    }

    #[test]
    fn cost_is_monotonic_non_decreasing() {
        let mut ledger = CostLedger::new();
        let mut last = 0.0;
        for _ in 0..5 {
            ledger.add(Category::Implement, 500, 200, "claude-sonnet-4-20250514");
            let total = ledger.report().total;
            assert!(total >= last);
            last = total;
        }
    }

    #[test]
    fn unknown_model_still_produces_positive_cost() {
        let mut ledger = CostLedger::new();
        ledger.add(Category::Title, 100, 20, "some-future-model-9000");
        assert!(ledger.report().total > 0.0);
    }

    #[test]
    fn cached_tokens_reduce_cost() {
        let mut a = CostLedger::new();
        a.add(Category::Implement, 1000, 500, "claude-sonnet-4-20250514");

        let mut b = CostLedger::new();
        b.add_with_cache(Category::Implement, 1000, 500, 500, "claude-sonnet-4-20250514");

        assert!(b.report().total < a.report().total);
    }
}
