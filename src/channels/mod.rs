//! Channels deliver platform input to the dispatcher and present replies.
//!
//! Each channel is a runtime [`Component`](crate::runtime::Component) that
//! pushes [`Envelope`](crate::interaction::Envelope)s into the dispatch
//! queue.

#[cfg(feature = "channel-pty")]
pub mod console;
