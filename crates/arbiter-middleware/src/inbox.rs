//! Rate-limited inbox for externally injected goal proposals.
//!
//! Operators and peer agents may suggest goals at any time. Proposals are
//! admitted through a `governor` direct rate limiter and buffered in a
//! bounded channel; the tick loop drains them at the start of each tick and
//! screens them against policy before any feasibility work happens.

use std::num::NonZeroU32;
use std::sync::Arc;

use arbiter_types::config::InboxConfig;
use arbiter_types::{ArbiterError, GoalProposal};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Cloneable submission handle.
#[derive(Clone)]
pub struct GoalInbox {
    limiter: Arc<DefaultDirectRateLimiter>,
    tx: mpsc::Sender<GoalProposal>,
}

pub struct InboxReceiver {
    rx: mpsc::Receiver<GoalProposal>,
}

impl GoalInbox {
    /// Build an inbox from config. A zero rate is rejected as a config error.
    pub fn new(config: &InboxConfig) -> Result<(Self, InboxReceiver), ArbiterError> {
        let rate = NonZeroU32::new(config.proposals_per_second)
            .ok_or_else(|| ArbiterError::Config("inbox.proposals_per_second must be > 0".into()))?;
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));
        Ok((Self { limiter, tx }, InboxReceiver { rx }))
    }

    /// Offer a proposal. Fails when the submitter exceeds the rate limit,
    /// the buffer is full, or the arbiter has shut down.
    pub fn submit(&self, proposal: GoalProposal) -> Result<(), ArbiterError> {
        if self.limiter.check().is_err() {
            warn!(source = %proposal.source, template = %proposal.template_ref, "goal proposal rate limited");
            return Err(ArbiterError::Channel("goal inbox rate limit exceeded".into()));
        }
        self.tx.try_send(proposal).map_err(|e| match e {
            mpsc::error::TrySendError::Full(p) => {
                ArbiterError::Channel(format!("goal inbox full, dropped proposal {}", p.template_ref))
            }
            mpsc::error::TrySendError::Closed(_) => ArbiterError::Channel("goal inbox closed".into()),
        })?;
        debug!("goal proposal accepted");
        Ok(())
    }
}

impl InboxReceiver {
    /// Take all pending proposals without waiting.
    pub fn drain(&mut self) -> Vec<GoalProposal> {
        let mut out = Vec::new();
        while let Ok(p) = self.rx.try_recv() {
            out.push(p);
        }
        out
    }
}
