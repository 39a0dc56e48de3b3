//! Dispatch token registry.
//!
//! Maps the opaque tokens handed to workers back to job ids. Possession of a
//! live token is the whole authorization story for worker callbacks: the
//! channel was authenticated before the token was ever issued.
//!
//! Tokens are kept in memory only. After a restart, jobs that were Running
//! have no token anymore and can no longer be concluded by their worker.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use kiln_core::{DispatchToken, JobId};

/// How long a retired token keeps answering cancellation checks.
pub const RETIRED_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on retired tokens kept around, oldest evicted first.
pub const RETIRED_TOKEN_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("unknown dispatch token")]
    Unknown,
    #[error("dispatch token belongs to a concluded claim")]
    Retired,
}

#[derive(Debug, Default)]
struct Tokens {
    live: HashMap<DispatchToken, JobId>,
    retired: HashMap<DispatchToken, JobId>,
    /// Retirement order; each retired token appears exactly once.
    retired_order: VecDeque<(Instant, DispatchToken)>,
}

impl Tokens {
    fn prune(&mut self, now: Instant, ttl: Duration, capacity: usize) {
        while let Some(&(retired_at, token)) = self.retired_order.front() {
            let expired = now.saturating_duration_since(retired_at) >= ttl;
            if !expired && self.retired_order.len() <= capacity {
                break;
            }
            self.retired_order.pop_front();
            self.retired.remove(&token);
        }
    }
}

/// Live tokens stay until their claim concludes. Retired tokens are kept for
/// a bounded time and count, then forgotten (resolving them reports
/// `Unknown`).
#[derive(Debug)]
pub struct TokenRegistry {
    tokens: RwLock<Tokens>,
    retired_ttl: Duration,
    retired_capacity: usize,
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::with_retention(RETIRED_TOKEN_TTL, RETIRED_TOKEN_CAPACITY)
    }
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retired_ttl: Duration, retired_capacity: usize) -> Self {
        Self {
            tokens: RwLock::new(Tokens::default()),
            retired_ttl,
            retired_capacity,
        }
    }

    /// Mint a fresh live token bound to `job_id`.
    pub fn issue(&self, job_id: JobId) -> DispatchToken {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.prune(Instant::now(), self.retired_ttl, self.retired_capacity);
        loop {
            let token = DispatchToken::new();
            if tokens.retired.contains_key(&token) {
                continue;
            }
            if let std::collections::hash_map::Entry::Vacant(slot) = tokens.live.entry(token) {
                slot.insert(job_id);
                return token;
            }
        }
    }

    /// Resolve a token whether or not its claim has concluded.
    ///
    /// Read-only callbacks (cancellation checks) use this.
    pub fn resolve(&self, token: &DispatchToken) -> Result<JobId, TokenError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .live
            .get(token)
            .or_else(|| tokens.retired.get(token))
            .copied()
            .ok_or(TokenError::Unknown)
    }

    /// Resolve a token that must still carry a live claim.
    pub fn resolve_live(&self, token: &DispatchToken) -> Result<JobId, TokenError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        match tokens.live.get(token) {
            Some(job_id) => Ok(*job_id),
            None if tokens.retired.contains_key(token) => Err(TokenError::Retired),
            None => Err(TokenError::Unknown),
        }
    }

    /// Mark the claim behind `token` as concluded. Returns whether the token
    /// was live.
    pub fn retire(&self, token: &DispatchToken) -> bool {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let retired = match tokens.live.remove(token) {
            Some(job_id) => {
                tokens.retired.insert(*token, job_id);
                tokens.retired_order.push_back((Instant::now(), *token));
                true
            }
            None => false,
        };
        tokens.prune(Instant::now(), self.retired_ttl, self.retired_capacity);
        retired
    }

    /// Claims currently in flight.
    pub fn live_count(&self) -> usize {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner).live.len()
    }
}
