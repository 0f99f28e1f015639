//! `arbiter-perception` – turns raw measurements into drives.
//!
//! # Modules
//!
//! - [`signals`] – [`SignalNormalizer`][signals::SignalNormalizer]: maps
//!   heterogeneous [`RawSignal`][arbiter_types::RawSignal]s onto the uniform
//!   [`Signal`][arbiter_types::Signal] record, handling supersession, TTL
//!   expiry and same-tick fusion across providers.
//! - [`needs`] – [`NeedAggregator`][needs::NeedAggregator]: reduces a
//!   [`SignalSnapshot`][signals::SignalSnapshot] to a small
//!   [`NeedTable`][needs::NeedTable] by context-gated linear combination.

pub mod needs;
pub mod signals;

pub use needs::{NeedAggregator, NeedTable};
pub use signals::{SignalNormalizer, SignalSnapshot};
