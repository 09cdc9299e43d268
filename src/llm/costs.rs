//! Per-token pricing for known models, USD.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token for a model id. Unknown models price
/// at zero rather than guessing.
pub fn cost_per_token(model: &str) -> (Decimal, Decimal) {
    let per_million = if model.contains("claude-opus") {
        (dec!(15.00), dec!(75.00))
    } else if model.contains("claude-sonnet") || model.contains("claude-3-5-sonnet") {
        (dec!(3.00), dec!(15.00))
    } else if model.contains("claude-haiku") || model.contains("claude-3-5-haiku") {
        (dec!(0.80), dec!(4.00))
    } else if model.starts_with("gpt-4o-mini") {
        (dec!(0.15), dec!(0.60))
    } else if model.starts_with("gpt-4o") {
        (dec!(2.50), dec!(10.00))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    let million = dec!(1000000);
    (per_million.0 / million, per_million.1 / million)
}
