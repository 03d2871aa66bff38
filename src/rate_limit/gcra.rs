//! The continuous-state GCRA step.
//!
//! State is a single theoretical arrival time (TAT) in seconds. A request for `units`
//! advances the TAT by `units * emission_interval`; it is admitted when the advanced TAT
//! stays within `delay_variation_tolerance` of now. Denied requests leave the TAT alone.
//!
//! [`step`] is the reference arithmetic. Stores that cannot run Rust next to their data
//! (Redis) mirror it as a server-side script; see [`GCRA_LUA`].

use crate::rate_limit::store::ReplyValue;
use crate::Limit;

/// Upper bound in seconds on the slack absorbed when comparing and flooring
/// floating-point times, so that accumulated rounding never denies an exactly-fitting
/// request or drops a whole unit from `remaining`.
pub const DRIFT_SECS: f64 = 1e-6;

/// Largest share of one emission interval the slack may cover. Keeps the slack below a
/// whole unit for sub-microsecond intervals.
pub const DRIFT_FRACTION: f64 = 1e-3;

/// Slack in seconds for one step at `emission_interval`.
pub fn drift_slack(emission_interval: f64) -> f64 {
    DRIFT_SECS.min(emission_interval * DRIFT_FRACTION)
}

/// Argument vector for one execution of the atomic step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcraArgs {
    /// Bucket capacity.
    pub burst: u32,
    /// Events per period.
    pub rate: u32,
    /// Period length in seconds.
    pub period_secs: f64,
    /// Units requested by this call.
    pub units: u32,
}

impl GcraArgs {
    /// Arguments for requesting `units` under `limit`.
    pub fn new(limit: &Limit, units: u32) -> Self {
        Self {
            burst: limit.burst(),
            rate: limit.rate(),
            period_secs: limit.period().as_secs_f64(),
            units,
        }
    }

    /// `period / rate` in seconds.
    pub fn emission_interval(&self) -> f64 {
        self.period_secs / f64::from(self.rate)
    }

    /// True when no request can ever be admitted under these arguments: zero rate, burst
    /// or units, or a period that is not a positive finite number.
    pub fn is_degenerate(&self) -> bool {
        self.rate == 0
            || self.burst == 0
            || self.units == 0
            || !self.period_secs.is_finite()
            || self.period_secs <= 0.0
    }
}

/// Outcome of [`step`]: the reply fields plus the write to perform, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Whole units still admissible after this call.
    pub remaining: u32,
    /// Seconds until this request could succeed; `-1.0` when allowed.
    pub retry_after: f64,
    /// Seconds until the key is fully cold.
    pub reset_after: f64,
    /// New TAT and its time-to-live in seconds. `None` means leave the store untouched.
    pub write: Option<(f64, f64)>,
}

impl StepOutcome {
    /// Encode as the reply shape shared by every store.
    pub fn into_reply(self) -> Vec<ReplyValue> {
        vec![
            ReplyValue::Int(i64::from(!self.allowed)),
            ReplyValue::Int(i64::from(self.remaining)),
            ReplyValue::Text(self.retry_after.to_string()),
            ReplyValue::Text(self.reset_after.to_string()),
        ]
    }
}

/// Run one GCRA step for the stored `tat` (if any) at time `now`.
///
/// Callers must hold whatever per-key exclusion their store provides for the whole
/// read-step-write sequence.
///
/// Degenerate arguments (see [`GcraArgs::is_degenerate`]) are denied with zero timings
/// and never touch the stored state.
pub fn step(tat: Option<f64>, now: f64, args: &GcraArgs) -> StepOutcome {
    if args.is_degenerate() {
        return StepOutcome {
            allowed: false,
            remaining: 0,
            retry_after: 0.0,
            reset_after: 0.0,
            write: None,
        };
    }

    let emission_interval = args.emission_interval();
    let delay_variation_tolerance = emission_interval * f64::from(args.burst);
    let slack = drift_slack(emission_interval);

    let tat = tat.unwrap_or(now).max(now);
    let new_tat = tat + emission_interval * f64::from(args.units);
    let allow_at = new_tat - delay_variation_tolerance;
    let diff = now - allow_at;

    if diff < -slack {
        return StepOutcome {
            allowed: false,
            remaining: 0,
            retry_after: -diff,
            reset_after: tat - now,
            write: None,
        };
    }

    let remaining = ((diff + slack) / emission_interval)
        .floor()
        .clamp(0.0, f64::from(args.burst)) as u32;
    let reset_after = new_tat - now;
    let write = (reset_after > 0.0).then_some((new_tat, reset_after));

    StepOutcome { allowed: true, remaining, retry_after: -1.0, reset_after, write }
}

/// Server-side rendition of [`step`] for Redis.
///
/// `KEYS[1]` is the namespaced key; `ARGV` is `burst, rate, period_secs, units`.
/// Returns `{limited, remaining, retry_after, reset_after}` with the two durations as
/// strings so they survive Redis' integer reply conversion.
pub const GCRA_LUA: &str = r#"
-- TIME is non-deterministic; writes after it need effects replication before Redis 5
redis.replicate_commands()

local key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local units = tonumber(ARGV[4])

if not (burst and rate and period and units)
  or burst <= 0 or rate <= 0 or units <= 0
  or not (period > 0) or period == math.huge then
  return {1, 0, "0", "0"}
end

local emission_interval = period / rate
local increment = emission_interval * units
local delay_variation_tolerance = emission_interval * burst
local slack = math.min(0.000001, emission_interval * 0.001)

-- seconds since 2017-01-01 keep sub-millisecond precision in a double
local time = redis.call("TIME")
local now = (tonumber(time[1]) - 1483228800) + (tonumber(time[2]) / 1000000)

local tat = tonumber(redis.call("GET", key))
if not tat or tat < now then
  tat = now
end

local new_tat = tat + increment
local allow_at = new_tat - delay_variation_tolerance
local diff = now - allow_at

if diff < -slack then
  return {1, 0, tostring(-diff), tostring(tat - now)}
end

local remaining = math.floor((diff + slack) / emission_interval)
if remaining < 0 then
  remaining = 0
elseif remaining > burst then
  remaining = burst
end

local reset_after = new_tat - now
if reset_after > 0 then
  redis.call("SET", key, string.format("%.6f", new_tat), "PX", math.ceil(reset_after * 1000))
end

return {0, remaining, "-1", tostring(reset_after)}
"#;
