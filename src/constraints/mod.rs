//! Constraint-narrowing engine.
//!
//! A [`Constraint`] is a value plus the provenance of every adjustment
//! made to it. The [`ConstraintAggregator`] threads one container through
//! every registered [`ConstraintSource`] in registration order:
//!
//! ```text
//!  initial ──▶ objectives ──▶ safety ──▶ hard-limits ──▶ pump ──▶ sensor ──▶ final
//!              (may narrow)   (may narrow) ...
//! ```
//!
//! Numeric kinds are upper bounds composed with `min`; permissions are
//! composed with AND, `false` being absorbing. Both compositions are
//! order-independent, so registration order only affects the order of
//! [`Constraint::history`].
//!
//! If no source is active the typed queries ([`ConstraintAggregator::permission`]
//! and friends) start from a restrictive value, so a misconfigured
//! aggregator blocks instead of passing everything through.

pub mod hard_limits;
pub mod objectives;
pub mod pump;
pub mod safety;
pub mod sensor;

use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::app::ports::ObjectiveGate;
use crate::config::SystemConfig;
use crate::mode::OperatingMode;
use crate::profile::Profile;

pub use hard_limits::HardLimits;
pub use objectives::ObjectivesSource;
pub use pump::{PumpCapabilities, PumpSource};
pub use safety::SafetySource;
pub use sensor::{SensorCapabilities, SensorSource};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Types a constraint can carry. `RESTRICTIVE` is the fail-safe start value.
pub trait ConstraintValue: Copy + PartialOrd + fmt::Debug + fmt::Display {
    const RESTRICTIVE: Self;
    const PERMISSIVE: Self;
}

impl ConstraintValue for bool {
    const RESTRICTIVE: Self = false;
    const PERMISSIVE: Self = true;
}

impl ConstraintValue for i32 {
    const RESTRICTIVE: Self = 0;
    const PERMISSIVE: Self = i32::MAX;
}

impl ConstraintValue for f64 {
    const RESTRICTIVE: Self = 0.0;
    const PERMISSIVE: Self = f64::MAX;
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// One provenance record: which source moved the value, why, and to what.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintEntry<T> {
    pub source: &'static str,
    pub message: String,
    /// Value of the constraint right after this entry was applied.
    pub value: T,
    pub applied_at_ms: i64,
}

/// A bound together with the history of everything that narrowed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint<T> {
    value: T,
    history: Vec<ConstraintEntry<T>>,
}

impl<T: ConstraintValue> Constraint<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: initial,
            history: Vec::new(),
        }
    }

    pub fn value(&self) -> T {
        self.value
    }

    /// Every narrowing in application order.
    pub fn history(&self) -> &[ConstraintEntry<T>] {
        &self.history
    }

    /// Narrow to `candidate` if it is strictly tighter than the current
    /// value; otherwise the container is returned unchanged.
    #[must_use]
    pub fn limit(
        mut self,
        candidate: T,
        source: &'static str,
        message: impl Into<String>,
        at_ms: i64,
    ) -> Self {
        if candidate < self.value {
            self.value = candidate;
            self.history.push(ConstraintEntry {
                source,
                message: message.into(),
                value: candidate,
                applied_at_ms: at_ms,
            });
        }
        self
    }

    /// Narrow with the tightest of several candidates offered by one
    /// source. At most one entry is recorded; ties keep the first reason.
    #[must_use]
    pub fn limit_tightest<M: Into<String>>(
        self,
        candidates: impl IntoIterator<Item = (T, M)>,
        source: &'static str,
        at_ms: i64,
    ) -> Self {
        let current = self.value;
        let tightest = candidates
            .into_iter()
            .filter(|(v, _)| *v < current)
            .fold(None::<(T, M)>, |best, (v, m)| match best {
                Some((b, bm)) if b <= v => Some((b, bm)),
                _ => Some((v, m)),
            });
        match tightest {
            Some((v, m)) => self.limit(v, source, m, at_ms),
            None => self,
        }
    }

    /// Entries responsible for the final value.
    pub fn most_limiting(&self) -> Vec<&ConstraintEntry<T>> {
        self.history.iter().filter(|e| e.value == self.value).collect()
    }

    /// All reasons as `source: message`, joined for display.
    pub fn reasons(&self) -> String {
        join_entries(self.history.iter())
    }

    /// Most-limiting reasons as `source: message`, joined for display.
    pub fn most_limiting_reasons(&self) -> String {
        join_entries(self.most_limiting().into_iter())
    }
}

impl Constraint<bool> {
    /// Set the permission to `false`. Always recorded, even when another
    /// source already blocked it, so every blocking cause stays visible.
    #[must_use]
    pub fn disallow(mut self, source: &'static str, message: impl Into<String>, at_ms: i64) -> Self {
        self.value = false;
        self.history.push(ConstraintEntry {
            source,
            message: message.into(),
            value: false,
            applied_at_ms: at_ms,
        });
        self
    }

    /// Disallow once with every reason joined. Unchanged when `reasons`
    /// is empty.
    #[must_use]
    pub fn disallow_all(self, source: &'static str, reasons: &[&str], at_ms: i64) -> Self {
        if reasons.is_empty() {
            self
        } else {
            self.disallow(source, reasons.join("; "), at_ms)
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.value
    }
}

fn join_entries<'a, T: 'a>(entries: impl Iterator<Item = &'a ConstraintEntry<T>>) -> String {
    entries
        .map(|e| format!("{}: {}", e.source, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Boolean permissions (AND composition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    LoopInvocation,
    ClosedLoop,
    /// Closed loop restricted to low-glucose suspend.
    Lgs,
    Smb,
    Autosens,
    AdvancedFiltering,
}

/// Real-valued upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimit {
    /// Units.
    MaxBolus,
    /// U/h.
    MaxBasalRate,
    /// Units.
    MaxIob,
}

/// Integer upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountLimit {
    /// Grams.
    MaxCarbs,
    /// Percent of the current profile basal.
    MaxBasalPercent,
}

/// Routes a kind to the matching [`ConstraintSource`] method.
pub trait ConstraintKind: Copy + fmt::Debug {
    type Value: ConstraintValue;

    fn narrow_with(
        self,
        source: &dyn ConstraintSource,
        constraint: Constraint<Self::Value>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<Self::Value>;
}

impl ConstraintKind for Permission {
    type Value = bool;

    fn narrow_with(
        self,
        source: &dyn ConstraintSource,
        constraint: Constraint<bool>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        source.narrow_permission(self, constraint, ctx)
    }
}

impl ConstraintKind for RateLimit {
    type Value = f64;

    fn narrow_with(
        self,
        source: &dyn ConstraintSource,
        constraint: Constraint<f64>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<f64> {
        source.narrow_rate(self, constraint, ctx)
    }
}

impl ConstraintKind for CountLimit {
    type Value = i32;

    fn narrow_with(
        self,
        source: &dyn ConstraintSource,
        constraint: Constraint<i32>,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<i32> {
        source.narrow_count(self, constraint, ctx)
    }
}

// ---------------------------------------------------------------------------
// Sources and their inputs
// ---------------------------------------------------------------------------

/// Everything a source may consult during one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ConstraintContext<'a> {
    pub now_ms: i64,
    pub utc_offset_ms: i64,
    pub config: &'a SystemConfig,
    pub profile: Option<&'a Profile>,
    /// Operating mode at evaluation time.
    pub mode: OperatingMode,
    pub pump: PumpCapabilities,
    pub sensor: SensorCapabilities,
}

impl ConstraintContext<'_> {
    /// Same inputs, different operating mode.
    #[must_use]
    pub fn with_mode(&self, mode: OperatingMode) -> Self {
        Self { mode, ..*self }
    }

    /// Profile basal in effect at `now_ms`, if a profile is active.
    pub fn current_basal(&self) -> Option<f64> {
        self.profile
            .map(|p| p.basal_at(self.now_ms, self.utc_offset_ms))
    }
}

/// A named participant that may narrow one or more constraint kinds.
///
/// Every method defaults to returning the container untouched.
pub trait ConstraintSource {
    fn name(&self) -> &'static str;

    /// Inactive sources are skipped for this evaluation.
    fn is_active(&self, _ctx: &ConstraintContext<'_>) -> bool {
        true
    }

    fn narrow_permission(
        &self,
        _kind: Permission,
        constraint: Constraint<bool>,
        _ctx: &ConstraintContext<'_>,
    ) -> Constraint<bool> {
        constraint
    }

    fn narrow_rate(
        &self,
        _kind: RateLimit,
        constraint: Constraint<f64>,
        _ctx: &ConstraintContext<'_>,
    ) -> Constraint<f64> {
        constraint
    }

    fn narrow_count(
        &self,
        _kind: CountLimit,
        constraint: Constraint<i32>,
        _ctx: &ConstraintContext<'_>,
    ) -> Constraint<i32> {
        constraint
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Ordered list of constraint sources.
#[derive(Default)]
pub struct ConstraintAggregator {
    sources: Vec<Box<dyn ConstraintSource + Send + Sync>>,
}

impl ConstraintAggregator {
    /// An aggregator with no sources. Every typed query on it is blocked.
    pub fn new() -> Self {
        Self::default()
    }

    /// The production assembly; the hard-limit source is always part of it.
    pub fn standard(gate: Arc<dyn ObjectiveGate + Send + Sync>) -> Self {
        let mut aggregator = Self::new();
        aggregator
            .register(Box::new(ObjectivesSource::new(gate)))
            .register(Box::new(SafetySource))
            .register(Box::new(HardLimits))
            .register(Box::new(PumpSource))
            .register(Box::new(SensorSource));
        aggregator
    }

    /// Append a source at the end of the evaluation order.
    pub fn register(&mut self, source: Box<dyn ConstraintSource + Send + Sync>) -> &mut Self {
        debug!("constraint source registered: {}", source.name());
        self.sources.push(source);
        self
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn active_sources(&self, ctx: &ConstraintContext<'_>) -> usize {
        self.sources.iter().filter(|s| s.is_active(ctx)).count()
    }

    /// Run `initial` through every active source in order.
    pub fn apply<K: ConstraintKind>(
        &self,
        kind: K,
        initial: K::Value,
        ctx: &ConstraintContext<'_>,
    ) -> Constraint<K::Value> {
        let mut constraint = Constraint::new(initial);
        for source in self.sources.iter().filter(|s| s.is_active(ctx)) {
            let before = constraint.history.len();
            constraint = kind.narrow_with(source.as_ref(), constraint, ctx);
            if constraint.history.len() > before {
                debug!(
                    "{:?} narrowed to {} by {}",
                    kind,
                    constraint.value,
                    source.name()
                );
            }
        }
        constraint
    }

    /// Start value for the typed queries: permissive only when at least
    /// one source is there to narrow it.
    fn start_value<T: ConstraintValue>(&self, ctx: &ConstraintContext<'_>) -> T {
        if self.active_sources(ctx) == 0 {
            log::warn!("no active constraint sources, blocking by default");
            T::RESTRICTIVE
        } else {
            T::PERMISSIVE
        }
    }

    pub fn permission(&self, kind: Permission, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.apply(kind, self.start_value(ctx), ctx)
    }

    pub fn rate_limit(&self, kind: RateLimit, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.apply(kind, self.start_value(ctx), ctx)
    }

    pub fn count_limit(&self, kind: CountLimit, ctx: &ConstraintContext<'_>) -> Constraint<i32> {
        self.apply(kind, self.start_value(ctx), ctx)
    }

    // ── Named queries ─────────────────────────────────────────

    pub fn is_loop_invocation_allowed(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::LoopInvocation, ctx)
    }

    pub fn is_closed_loop_allowed(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::ClosedLoop, ctx)
    }

    pub fn is_lgs_allowed(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::Lgs, ctx)
    }

    pub fn is_smb_enabled(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::Smb, ctx)
    }

    pub fn is_autosens_enabled(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::Autosens, ctx)
    }

    pub fn is_advanced_filtering_enabled(&self, ctx: &ConstraintContext<'_>) -> Constraint<bool> {
        self.permission(Permission::AdvancedFiltering, ctx)
    }

    pub fn max_bolus(&self, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.rate_limit(RateLimit::MaxBolus, ctx)
    }

    pub fn max_basal(&self, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.rate_limit(RateLimit::MaxBasalRate, ctx)
    }

    pub fn max_iob(&self, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.rate_limit(RateLimit::MaxIob, ctx)
    }

    pub fn max_basal_percent(&self, ctx: &ConstraintContext<'_>) -> Constraint<i32> {
        self.count_limit(CountLimit::MaxBasalPercent, ctx)
    }

    pub fn max_carbs(&self, ctx: &ConstraintContext<'_>) -> Constraint<i32> {
        self.count_limit(CountLimit::MaxCarbs, ctx)
    }

    /// Starting point for a clamped request: the request itself, but never
    /// above [`start_value`](Self::start_value). Unordered requests (NaN)
    /// start restrictive.
    fn clamp_start<T: ConstraintValue>(&self, requested: T, ctx: &ConstraintContext<'_>) -> T {
        let start = self.start_value(ctx);
        match requested.partial_cmp(&start) {
            Some(Ordering::Less | Ordering::Equal) => requested,
            Some(Ordering::Greater) => start,
            None => T::RESTRICTIVE,
        }
    }

    /// Clamp a requested bolus; the history explains any reduction.
    pub fn apply_bolus(&self, requested_u: f64, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.apply(RateLimit::MaxBolus, self.clamp_start(requested_u, ctx), ctx)
    }

    /// Clamp a requested temporary basal rate.
    pub fn apply_basal(&self, requested_u_per_h: f64, ctx: &ConstraintContext<'_>) -> Constraint<f64> {
        self.apply(RateLimit::MaxBasalRate, self.clamp_start(requested_u_per_h, ctx), ctx)
    }

    /// Clamp a requested carb entry.
    pub fn apply_carbs(&self, requested_g: i32, ctx: &ConstraintContext<'_>) -> Constraint<i32> {
        self.apply(CountLimit::MaxCarbs, self.clamp_start(requested_g, ctx), ctx)
    }
}

// ---------------------------------------------------------------------------
// Per-cycle snapshot
// ---------------------------------------------------------------------------

/// All bounds the dosing algorithm needs for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopBounds {
    pub loop_invocation: Constraint<bool>,
    pub closed_loop: Constraint<bool>,
    pub smb: Constraint<bool>,
    pub autosens: Constraint<bool>,
    pub max_bolus: Constraint<f64>,
    pub max_basal: Constraint<f64>,
    pub max_basal_percent: Constraint<i32>,
    pub max_iob: Constraint<f64>,
    pub max_carbs: Constraint<i32>,
}

impl LoopBounds {
    pub fn evaluate(aggregator: &ConstraintAggregator, ctx: &ConstraintContext<'_>) -> Self {
        Self {
            loop_invocation: aggregator.is_loop_invocation_allowed(ctx),
            closed_loop: aggregator.is_closed_loop_allowed(ctx),
            smb: aggregator.is_smb_enabled(ctx),
            autosens: aggregator.is_autosens_enabled(ctx),
            max_bolus: aggregator.max_bolus(ctx),
            max_basal: aggregator.max_basal(ctx),
            max_basal_percent: aggregator.max_basal_percent(ctx),
            max_iob: aggregator.max_iob(ctx),
            max_carbs: aggregator.max_carbs(ctx),
        }
    }
}
