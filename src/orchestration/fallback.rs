//! Model fallback state machine.
//!
//! Two states, Primary and Fallback. A rate-limit signal while on the
//! primary model switches to the fallback immediately; after `retry_interval`
//! the primary is retried optimistically, and a successful primary call at
//! any point switches back at once. The optimistic timer keeps the preferred
//! model from being starved indefinitely; the success short-circuit recovers
//! faster than the timer when quota frees up sooner.

use std::time::{Duration, Instant};

use crate::dlog_debug;

use super::retry::is_rate_limit;

/// Mutable fallback state, owned by the manager.
#[derive(Debug, Clone)]
pub struct FallbackState {
    pub in_fallback: bool,
    pub entered_at: Option<Instant>,
    pub rate_limit_count: u32,
}

impl FallbackState {
    fn initial() -> Self {
        Self {
            in_fallback: false,
            entered_at: None,
            rate_limit_count: 0,
        }
    }
}

/// Per-engine model selection.
///
/// Parallel workers each hold their own clone; the state machine is not
/// shared across concurrent engine invocations.
#[derive(Debug, Clone)]
pub struct ModelFallbackManager {
    primary: Option<String>,
    fallback: Option<String>,
    retry_interval: Duration,
    /// Whether a rate-limited fallback model is itself retried after the
    /// cooldown instead of stalling. Off by default.
    retry_in_fallback: bool,
    state: FallbackState,
}

impl ModelFallbackManager {
    pub fn new(
        primary: Option<String>,
        fallback: Option<String>,
        retry_interval: Duration,
        retry_in_fallback: bool,
    ) -> Self {
        Self {
            primary,
            fallback,
            retry_interval,
            retry_in_fallback,
            state: FallbackState::initial(),
        }
    }

    pub fn primary_model(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn is_in_fallback(&self) -> bool {
        self.state.in_fallback
    }

    pub fn state(&self) -> &FallbackState {
        &self.state
    }

    /// The model to request right now.
    ///
    /// While in fallback, an elapsed cooldown transitions back to Primary
    /// before answering (optimistic retry). `None` means "let the engine use
    /// its default model".
    pub fn current_model(&mut self) -> Option<String> {
        if self.state.in_fallback {
            let elapsed = self
                .state
                .entered_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.retry_interval {
                dlog_debug!(
                    "Fallback cooldown elapsed ({:?}), optimistically retrying primary",
                    elapsed
                );
                self.state = FallbackState::initial();
                self.primary.clone()
            } else {
                self.fallback.clone()
            }
        } else {
            self.primary.clone()
        }
    }

    /// Feed an engine error into the state machine.
    ///
    /// Returns true when the caller should retry immediately with the newly
    /// selected model. While already in fallback there is no further switch
    /// to make, so the answer is false (no fallback-of-fallback loops) —
    /// unless `retry_in_fallback` is set and the cooldown elapsed.
    pub fn handle_error(&mut self, error: &str) -> bool {
        if !is_rate_limit(error) {
            return false;
        }
        self.state.rate_limit_count += 1;
        if self.fallback.is_none() {
            return false;
        }
        if !self.state.in_fallback {
            dlog_debug!(
                "Rate limit on primary model ({} consecutive), switching to fallback",
                self.state.rate_limit_count
            );
            self.state.in_fallback = true;
            self.state.entered_at = Some(Instant::now());
            return true;
        }
        if self.retry_in_fallback {
            let elapsed = self
                .state
                .entered_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.retry_interval {
                self.state.entered_at = Some(Instant::now());
                return true;
            }
        }
        false
    }

    /// Record a successful invocation with the model that served it.
    ///
    /// A successful primary call is an authoritative signal that quota
    /// recovered, independent of the timer.
    pub fn record_success(&mut self, model_used: Option<&str>) {
        self.state.rate_limit_count = 0;
        if self.state.in_fallback && model_used == self.primary.as_deref() {
            dlog_debug!("Primary model succeeded while in fallback, switching back");
            self.state.in_fallback = false;
            self.state.entered_at = None;
        }
    }
}
