//! `events` crate — in-process pub/sub of workflow progress events.

pub mod broadcaster;

pub use broadcaster::{Broadcaster, Event, EventType};
