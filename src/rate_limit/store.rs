use crate::clock::{Clock, SystemClock};
use crate::rate_limit::gcra::{self, GcraArgs};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One element of a store reply, as loosely typed as the store's wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    /// Integer reply.
    Int(i64),
    /// Double reply.
    Float(f64),
    /// Text reply.
    Text(String),
    /// Binary-safe string reply.
    Bytes(Vec<u8>),
    /// Missing value.
    Nil,
}

/// Shared state store capable of running the GCRA step atomically.
///
/// An implementation must run the whole step (read the TAT stored under `key`, decide,
/// conditionally write the new TAT with its TTL) as one indivisible operation with
/// respect to other executions on the same key. Splitting the read and the write into
/// separate round trips double-spends capacity under concurrency.
///
/// The reply is `[limited, remaining, retry_after_secs, reset_after_secs]` where
/// `limited` is `0` for allowed and `1` for denied and `retry_after_secs` is `-1` when
/// no wait is needed.
#[async_trait]
pub trait GcraStore: Send + Sync {
    /// Error type for transport or execution failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute one GCRA step against the namespaced `key`.
    async fn execute(&self, key: &str, args: &GcraArgs) -> Result<Vec<ReplyValue>, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tat: f64,
    expires_at: f64,
}

impl Slot {
    fn live_tat(&self, now: f64) -> Option<f64> {
        (self.expires_at > now).then_some(self.tat)
    }
}

/// Process-local store with the same per-key atomicity as a server-side script.
///
/// Each key's step runs under its shard's write lock, so calls on one key serialize
/// while other keys proceed on other shards. Expired entries are treated as absent and
/// dropped lazily; [`InMemoryStore::purge_expired`] sweeps them eagerly.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Store driven by `clock` (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { entries: Arc::new(DashMap::new()), clock: Arc::new(clock) }
    }

    /// Number of keys currently holding state, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no key holds state.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.live_tat(now).is_some());
        before.saturating_sub(self.entries.len())
    }

    /// Sweep expired entries every `every` on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once every clone of the store has
    /// been dropped.
    pub fn spawn_purger(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let entries: Weak<DashMap<String, Slot>> = Arc::downgrade(&self.entries);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else { break };
                let now = clock.now_secs();
                entries.retain(|_, slot| slot.live_tat(now).is_some());
            }
            tracing::trace!(target: "cellrate", "in-memory purger stopped");
        })
    }
}

#[async_trait]
impl GcraStore for InMemoryStore {
    type Error = std::convert::Infallible;

    async fn execute(&self, key: &str, args: &GcraArgs) -> Result<Vec<ReplyValue>, Self::Error> {
        let now = self.clock.now_secs();

        let outcome = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().live_tat(now);
                let outcome = gcra::step(live, now, args);
                match outcome.write {
                    Some((tat, ttl)) => *occupied.get_mut() = Slot { tat, expires_at: now + ttl },
                    None if live.is_none() => {
                        occupied.remove();
                    }
                    None => {}
                }
                outcome
            }
            Entry::Vacant(vacant) => {
                let outcome = gcra::step(None, now, args);
                if let Some((tat, ttl)) = outcome.write {
                    vacant.insert(Slot { tat, expires_at: now + ttl });
                }
                outcome
            }
        };

        Ok(outcome.into_reply())
    }
}
