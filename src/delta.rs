//! Cumulative-counter pre-processing.
//!
//! Some stations report running totals, such as a lifetime strike count,
//! where the interesting observation is the change since the previous sample.
//! A [`CounterDelta`] turns the stream of totals into a stream of deltas and
//! handles the moment a counter runs backwards according to a configured
//! [`RolloverPolicy`].
//!
//! The baseline deliberately survives archive-window resets: a counter's
//! previous total is a property of the sample stream, not of any one window.

use log::debug;

use crate::error::{WxError, WxResult};
use crate::sample::is_identifier;

/// What to make of a total that is lower than the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum RolloverPolicy {
    /// The counter restarted from zero, so the new total itself is the count
    /// accumulated since the restart. The usual case for battery swaps and
    /// sensor reboots.
    #[default]
    Reset,
    /// The regression is untrustworthy; emit nothing and start a fresh
    /// baseline from the new total.
    Discard,
    /// The counter wrapped at a fixed modulus; the delta is the distance
    /// travelled through the wrap point.
    Wrap {
        /// Value at which the counter wraps back to zero.
        modulus: f64,
    },
}

/// A configured counter: the total field read, the delta field written and
/// the policy applied when the counter runs backwards.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedCounter {
    /// Field carrying the cumulative total.
    pub source: String,
    /// Field the per-sample delta is written to.
    pub delta_name: String,
    /// How regressions of the total are interpreted.
    pub policy: RolloverPolicy,
}

impl TrackedCounter {
    /// Builds a counter mapping with the given policy.
    pub fn new(
        source: impl Into<String>,
        delta_name: impl Into<String>,
        policy: RolloverPolicy,
    ) -> Self {
        Self {
            source: source.into(),
            delta_name: delta_name.into(),
            policy,
        }
    }

    /// Checks both field names and that they differ.
    pub fn validate(&self) -> WxResult<()> {
        for field in [&self.source, &self.delta_name] {
            if !is_identifier(field) {
                return Err(WxError::Config(format!(
                    "invalid counter field name '{field}'"
                )));
            }
        }
        if self.source == self.delta_name {
            return Err(WxError::Config(format!(
                "counter '{}' would overwrite its own total",
                self.source
            )));
        }
        Ok(())
    }
}

/// Delta stage over one cumulative counter field.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterDelta {
    policy: RolloverPolicy,
    previous: Option<f64>,
}

impl CounterDelta {
    /// Builds a stage with the given rollover policy and no baseline yet.
    pub fn new(policy: RolloverPolicy) -> Self {
        Self {
            policy,
            previous: None,
        }
    }

    /// The configured rollover policy.
    pub fn policy(&self) -> RolloverPolicy {
        self.policy
    }

    /// Feeds the next total, returning the delta since the previous one.
    ///
    /// The first total primes the baseline and yields `None`; non-finite
    /// totals are ignored outright and leave the baseline untouched. A
    /// regression is resolved by the rollover policy, and a `Wrap` result
    /// that still comes out negative is dropped as nonsense.
    pub fn advance(&mut self, total: f64) -> Option<f64> {
        if !total.is_finite() {
            debug!("ignoring non-finite counter total {total}");
            return None;
        }

        let delta = match self.previous {
            None => None,
            Some(previous) if total >= previous => Some(total - previous),
            Some(previous) => match self.policy {
                RolloverPolicy::Reset => {
                    debug!("counter reset detected: {previous} -> {total}");
                    Some(total)
                }
                RolloverPolicy::Discard => {
                    debug!("counter regression discarded: {previous} -> {total}");
                    None
                }
                RolloverPolicy::Wrap { modulus } => {
                    let wrapped = modulus - previous + total;
                    if wrapped < 0.0 {
                        debug!(
                            "counter wrap produced negative delta \
                             ({previous} -> {total} mod {modulus}), dropping"
                        );
                        None
                    } else {
                        Some(wrapped)
                    }
                }
            },
        };
        self.previous = Some(total);
        delta
    }

    /// Forgets the baseline, as after a station restart.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
