/// bars/registry.rs — Rule-name factory for bar builders.
///
/// Accepts the aliases used across the tooling and the run manifests:
///
///   tick | ticks | tick_count          → TickCountBarBuilder
///   volume | volume_qty                → VolumeQtyBarBuilder
///   dollar | value | dollar_value      → DollarBarBuilder
///   imbalance | imbalance_qty/_tick    → ImbalanceBarBuilder
///   composite | multi                  → CompositeBarBuilder (via thresholds)
///
/// Unknown names fail fast with the list of available rules.

use crate::error::ConfigError;

use super::composite::{ClosePolicy, CompositeBarBuilder, CompositeThresholds};
use super::imbalance::{ImbalanceBarBuilder, ImbalanceMode};
use super::{BarBuilder, DollarBarBuilder, TickCountBarBuilder, VolumeQtyBarBuilder};

const RULES: &[&str] = &["tick_count", "volume_qty", "dollar", "imbalance", "composite"];

pub fn available_rules() -> &'static [&'static str] {
    RULES
}

/// Canonical rule key: lowercased, separators collapsed to underscores,
/// aliases resolved.
pub fn normalize_rule(rule: &str) -> String {
    let mut key = rule.trim().to_ascii_lowercase();
    for sep in ['-', ' ', '.', '/'] {
        key = key.replace(sep, "_");
    }
    while key.contains("__") {
        key = key.replace("__", "_");
    }
    match key.as_str() {
        "tick" | "ticks" | "tick_count" => "tick_count".to_owned(),
        "volume" | "volume_qty" => "volume_qty".to_owned(),
        "dollar" | "value" | "dollar_value" => "dollar".to_owned(),
        "multi" => "composite".to_owned(),
        k if k.starts_with("imbalance") => k.to_owned(),
        _ => key,
    }
}

/// Build a single-rule bar builder from a rule name and its threshold.
///
/// `mode` applies to imbalance only ("qty" default, or "tick"); the
/// `imbalance_tick` / `imbalance_qty` aliases select it too.
pub fn make(rule: &str, limit: f64, mode: Option<&str>) -> Result<BarBuilder, ConfigError> {
    let key = normalize_rule(rule);
    match key.as_str() {
        "tick_count" => {
            if limit.fract() != 0.0 || limit < 1.0 || !limit.is_finite() {
                return Err(ConfigError::invalid(
                    "tick_limit",
                    format!("must be a positive integer, got {limit}"),
                ));
            }
            Ok(BarBuilder::TickCount(TickCountBarBuilder::new(limit as usize)?))
        }
        "volume_qty" => Ok(BarBuilder::VolumeQty(VolumeQtyBarBuilder::new(limit)?)),
        "dollar" => Ok(BarBuilder::Dollar(DollarBarBuilder::new(limit)?)),
        "imbalance" | "imbalance_qty" | "imbalance_tick" => {
            let m = match (key.as_str(), mode) {
                ("imbalance_tick", _) => ImbalanceMode::Tick,
                ("imbalance_qty", _) => ImbalanceMode::Qty,
                (_, Some(s)) => ImbalanceMode::parse(s)?,
                (_, None) => ImbalanceMode::Qty,
            };
            Ok(BarBuilder::Imbalance(ImbalanceBarBuilder::new(limit, m)?))
        }
        "composite" => Err(ConfigError::invalid(
            "rule",
            "composite has no single limit; use make_composite with thresholds",
        )),
        _ => Err(ConfigError::UnknownRule {
            rule: rule.to_owned(),
            available: RULES.join(", "),
        }),
    }
}

/// Build a composite builder from per-rule thresholds and a close policy.
pub fn make_composite(
    thresholds: &CompositeThresholds,
    policy: ClosePolicy,
) -> Result<BarBuilder, ConfigError> {
    Ok(BarBuilder::Composite(CompositeBarBuilder::from_thresholds(thresholds, policy)?))
}
