/// bars/composite.rs — Combine several closing rules under one policy.
///
/// The composite holds an ordered set of sub-rules plus a policy:
///
///   ANY — close as soon as any sub-rule would close on the current trade
///   ALL — close only when every sub-rule's threshold is satisfied
///         simultaneously on the current trade
///
/// Sub-rules track only their accumulator state (the composite owns the
/// single trade buffer), and every sub-rule resets atomically when the
/// composite closes a bar. Nested composites are rejected at construction.

use crate::error::ConfigError;
use crate::types::{Bar, Trade};

use super::build_bar;
use super::dollar::DollarBarBuilder;
use super::imbalance::{ImbalanceBarBuilder, ImbalanceMode};
use super::tick_count::TickCountBarBuilder;
use super::volume_qty::VolumeQtyBarBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    Any,
    All,
}

impl ClosePolicy {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(ClosePolicy::Any),
            "all" => Ok(ClosePolicy::All),
            other => Err(ConfigError::invalid(
                "policy",
                format!("must be 'any' or 'all', got '{other}'"),
            )),
        }
    }
}

/// Leaf rules a composite can combine.
#[derive(Debug)]
pub enum SubBuilder {
    TickCount(TickCountBarBuilder),
    VolumeQty(VolumeQtyBarBuilder),
    Dollar(DollarBarBuilder),
    Imbalance(ImbalanceBarBuilder),
}

impl SubBuilder {
    fn accumulate(&mut self, trade: &Trade) {
        match self {
            SubBuilder::TickCount(b) => b.accumulate(trade),
            SubBuilder::VolumeQty(b) => b.accumulate(trade),
            SubBuilder::Dollar(b) => b.accumulate(trade),
            SubBuilder::Imbalance(b) => b.accumulate(trade),
        }
    }

    fn threshold_reached(&self) -> bool {
        match self {
            SubBuilder::TickCount(b) => b.threshold_reached(),
            SubBuilder::VolumeQty(b) => b.threshold_reached(),
            SubBuilder::Dollar(b) => b.threshold_reached(),
            SubBuilder::Imbalance(b) => b.threshold_reached(),
        }
    }

    fn reset(&mut self) {
        match self {
            SubBuilder::TickCount(b) => b.reset(),
            SubBuilder::VolumeQty(b) => b.reset(),
            SubBuilder::Dollar(b) => b.reset(),
            SubBuilder::Imbalance(b) => b.reset(),
        }
    }
}

/// Thresholds for composite construction. At least one must be set;
/// absent rules simply don't participate.
#[derive(Debug, Clone, Default)]
pub struct CompositeThresholds {
    pub tick_limit:  Option<usize>,
    pub qty_limit:   Option<f64>,
    pub value_limit: Option<f64>,
    pub imbal_limit: Option<f64>,
    pub imbal_mode:  Option<ImbalanceMode>,
}

#[derive(Debug)]
pub struct CompositeBarBuilder {
    subs: Vec<SubBuilder>,
    policy: ClosePolicy,
    buffer: Vec<Trade>,
}

impl CompositeBarBuilder {
    pub fn new(subs: Vec<SubBuilder>, policy: ClosePolicy) -> Result<Self, ConfigError> {
        if subs.is_empty() {
            return Err(ConfigError::invalid("subs", "composite needs at least one sub-rule"));
        }
        Ok(Self { subs, policy, buffer: Vec::new() })
    }

    /// Build from per-rule thresholds, validating each through the leaf
    /// constructors.
    pub fn from_thresholds(
        th: &CompositeThresholds,
        policy: ClosePolicy,
    ) -> Result<Self, ConfigError> {
        let mut subs = Vec::new();
        if let Some(n) = th.tick_limit {
            subs.push(SubBuilder::TickCount(TickCountBarBuilder::new(n)?));
        }
        if let Some(q) = th.qty_limit {
            subs.push(SubBuilder::VolumeQty(VolumeQtyBarBuilder::new(q)?));
        }
        if let Some(v) = th.value_limit {
            subs.push(SubBuilder::Dollar(DollarBarBuilder::new(v)?));
        }
        if let Some(i) = th.imbal_limit {
            let mode = th.imbal_mode.unwrap_or(ImbalanceMode::Qty);
            subs.push(SubBuilder::Imbalance(ImbalanceBarBuilder::new(i, mode)?));
        }
        Self::new(subs, policy)
    }

    pub fn policy(&self) -> ClosePolicy {
        self.policy
    }

    pub fn update(&mut self, trade: &Trade) -> Option<Bar> {
        self.buffer.push(*trade);
        for sub in &mut self.subs {
            sub.accumulate(trade);
        }

        let closed = match self.policy {
            ClosePolicy::Any => self.subs.iter().any(SubBuilder::threshold_reached),
            ClosePolicy::All => self.subs.iter().all(SubBuilder::threshold_reached),
        };
        if closed {
            let bar = build_bar(&self.buffer);
            self.reset();
            return Some(bar);
        }
        None
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        for sub in &mut self.subs {
            sub.reset();
        }
    }

    pub fn open_trade_count(&self) -> usize {
        self.buffer.len()
    }
}
