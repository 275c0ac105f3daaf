//! Readiness-gated delivery of marker snapshots to the renderer.
//!
//! Lifecycle: Uninitialized → Loading → Ready. States only move forward for
//! the lifetime of one renderer instance. Until the renderer reports ready,
//! published snapshots land in a single superseding slot; the ready signal
//! flushes that slot once, and from then on every publish is sent at once.

use tracing::debug;

use crate::protocol::{Filter, MapMessage, Point};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The renderer side went away.
    Closed,
    /// The message could not be encoded for the transport.
    Encode(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "renderer channel closed"),
            ChannelError::Encode(msg) => write!(f, "failed to encode message: {msg}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Transport to the embedded renderer.
///
/// Implementations only move bytes; ordering and readiness are handled by
/// `RenderChannel`.
pub trait Channel {
    fn send(&mut self, message: &MapMessage) -> Result<(), ChannelError>;
}

/// Outcome of `RenderChannel::publish`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Publish {
    /// Delivered to the transport.
    Sent,
    /// Held in the pending slot until the renderer is ready.
    Buffered,
}

#[derive(Debug)]
pub struct RenderChannel<C> {
    state: ChannelState,
    pending: Option<MapMessage>,
    transport: C,
    sent: u64,
}

impl<C: Channel> RenderChannel<C> {
    pub fn new(transport: C) -> Self {
        Self {
            state: ChannelState::Uninitialized,
            pending: None,
            transport,
            sent: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn pending(&self) -> Option<&MapMessage> {
        self.pending.as_ref()
    }

    /// Number of messages handed to the transport so far.
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn transport(&self) -> &C {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut C {
        &mut self.transport
    }

    /// The renderer started constructing its map. No-op once past `Uninitialized`.
    pub fn begin_loading(&mut self) {
        if self.state == ChannelState::Uninitialized {
            self.state = ChannelState::Loading;
        }
    }

    /// Publish a full snapshot.
    pub fn publish(&mut self, points: Vec<Point>, filter: Filter) -> Result<Publish, ChannelError> {
        let message = MapMessage::UpdateMarkers { points, filter };
        if self.state != ChannelState::Ready {
            if self.pending.replace(message).is_some() {
                debug!("superseded pending marker snapshot");
            }
            return Ok(Publish::Buffered);
        }
        self.deliver(&message)?;
        Ok(Publish::Sent)
    }

    /// Handle the renderer's ready signal.
    ///
    /// Returns `true` if a pending snapshot was flushed. Signals after the
    /// first are ignored.
    pub fn mark_ready(&mut self) -> Result<bool, ChannelError> {
        if self.state == ChannelState::Ready {
            debug!("duplicate renderer ready signal ignored");
            return Ok(false);
        }
        self.state = ChannelState::Ready;
        match self.pending.take() {
            Some(message) => {
                self.deliver(&message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn deliver(&mut self, message: &MapMessage) -> Result<(), ChannelError> {
        self.transport.send(message)?;
        self.sent += 1;
        Ok(())
    }
}
