//! Per-attempt peer connection resources
//!
//! A [`PeerConnectionContext`] is built fresh for every (re)connection attempt
//! and dropped whole on peer loss. Nothing in it survives into the next
//! generation.

use super::candidates::CandidateGate;
use crate::peer::{DataChannelHandle, PeerHandle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Label of the reliable channel carrying link payload
pub const CONTROL_CHANNEL_LABEL: &str = "mavlink";

/// Label of the secondary JSON channel
pub const CUSTOM_CHANNEL_LABEL: &str = "custom";

/// Role of a data channel, from its label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Control,
    Custom,
    Unknown,
}

impl ChannelRole {
    pub fn from_label(label: &str) -> Self {
        match label {
            CONTROL_CHANNEL_LABEL => ChannelRole::Control,
            CUSTOM_CHANNEL_LABEL => ChannelRole::Custom,
            _ => ChannelRole::Unknown,
        }
    }
}

/// Peer connection, its channels, its inbound track and its candidate queue
pub struct PeerConnectionContext {
    generation: u64,
    peer: Arc<dyn PeerHandle>,
    control: Option<Arc<dyn DataChannelHandle>>,
    custom: Option<Arc<dyn DataChannelHandle>>,
    video_track: Option<String>,
    candidates: CandidateGate,
}

impl PeerConnectionContext {
    pub fn new(generation: u64, peer: Arc<dyn PeerHandle>) -> Self {
        Self {
            generation,
            peer,
            control: None,
            custom: None,
            video_track: None,
            candidates: CandidateGate::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> &Arc<dyn PeerHandle> {
        &self.peer
    }

    pub fn candidates(&self) -> &CandidateGate {
        &self.candidates
    }

    pub fn control(&self) -> Option<&Arc<dyn DataChannelHandle>> {
        self.control.as_ref()
    }

    pub fn custom(&self) -> Option<&Arc<dyn DataChannelHandle>> {
        self.custom.as_ref()
    }

    pub fn video_track(&self) -> Option<&str> {
        self.video_track.as_deref()
    }

    /// Remote description has been applied
    pub fn remote_description_set(&self) -> bool {
        self.candidates.remote_description_set()
    }

    /// Control channel exists and reports open
    pub fn data_channel_opened(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.is_open())
    }

    /// Keep a channel announced by the remote side
    ///
    /// At most one channel per role; a second one with the same label
    /// replaces the first.
    pub fn attach_channel(&mut self, channel: Arc<dyn DataChannelHandle>) -> ChannelRole {
        let role = ChannelRole::from_label(channel.label());
        let slot = match role {
            ChannelRole::Control => &mut self.control,
            ChannelRole::Custom => &mut self.custom,
            ChannelRole::Unknown => {
                warn!("Ignoring data channel with unknown label '{}'", channel.label());
                return role;
            }
        };

        if slot.replace(channel).is_some() {
            debug!("Replaced existing {:?} data channel", role);
        }
        role
    }

    /// Remember the inbound media track; only the first one is kept
    pub fn attach_track(&mut self, id: String) -> bool {
        if self.video_track.is_some() {
            return false;
        }
        self.video_track = Some(id);
        true
    }

    /// Close the peer connection and drop everything
    pub async fn close(self) {
        self.candidates.reset();
        if let Err(e) = self.peer.close().await {
            warn!(
                generation = self.generation,
                "Error closing peer connection {}: {}",
                self.peer.connection_id(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roles() {
        assert_eq!(ChannelRole::from_label("mavlink"), ChannelRole::Control);
        assert_eq!(ChannelRole::from_label("custom"), ChannelRole::Custom);
        assert_eq!(ChannelRole::from_label("video"), ChannelRole::Unknown);
    }
}
