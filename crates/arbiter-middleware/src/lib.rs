//! `arbiter-middleware` – the plumbing between the outside world and the tick
//! loop.
//!
//! Nothing in here interprets the data it carries.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus for telemetry,
//!   alerts and decisions, built on Tokio broadcast channels.
//! - [`channel`] – bounded signal ingestion channel; the tick loop drains it
//!   without blocking and overflow rejects the newest signal.
//! - [`adapter`] – the [`SignalSource`] trait and the [`pump`] task that
//!   forwards a source into the ingestion channel.
//! - [`inbox`] – rate-limited inbox for externally injected goal proposals.

pub mod adapter;
pub mod bus;
pub mod channel;
pub mod inbox;

pub use adapter::{pump, SignalSource};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use channel::{signal_channel, SignalReceiver, SignalSender};
pub use inbox::{GoalInbox, InboxReceiver};
