//! Channel registry: logical subscriptions multiplexed over one connection.
//!
//! A channel is a bookkeeping record, not a socket. Inbound frames are
//! attributed to every open channel whose category filter matches the frame
//! type. Closing the connection closes every channel; records are kept so
//! their counters stay inspectable.

use chrono::{DateTime, Utc};
use relay_core::ChannelId;
use serde::Serialize;

/// One logical channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel ID.
    pub channel_id: ChannelId,
    /// Comma-separated transport types; empty or `*` matches everything.
    pub category_filter: String,
    /// Cleared when the connection closes, never set again.
    pub is_open: bool,
    /// Delivered over attributed frames, in `[0, 1]`.
    pub efficiency: f64,
    /// Time of the last attributed frame.
    pub last_activity: Option<DateTime<Utc>>,
    /// Frames attributed to this channel.
    pub message_count: u64,
    #[serde(skip)]
    delivered: u64,
    #[serde(skip)]
    failed: u64,
}

impl Channel {
    fn new(category_filter: String) -> Self {
        Self {
            channel_id: ChannelId::new(),
            category_filter,
            is_open: true,
            efficiency: 1.0,
            last_activity: None,
            message_count: 0,
            delivered: 0,
            failed: 0,
        }
    }

    /// Whether a frame of the given transport type belongs to this channel.
    pub fn matches(&self, kind: &str) -> bool {
        let filter = self.category_filter.trim();
        if filter.is_empty() || filter == "*" {
            return true;
        }
        filter
            .split(',')
            .map(str::trim)
            .any(|category| category == "*" || category == kind)
    }

    fn touch(&mut self) {
        if !self.is_open {
            return;
        }
        self.last_activity = Some(Utc::now());
        self.message_count += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn settle(&mut self, delivered: bool) {
        if !self.is_open {
            return;
        }
        if delivered {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
        let total = self.delivered + self.failed;
        self.efficiency = self.delivered as f64 / total as f64;
    }

    fn close(&mut self) {
        self.is_open = false;
        self.efficiency = 0.0;
    }
}

/// Registry of every channel created on a connector.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new channel for the given category filter.
    pub fn create_channel(&mut self, category_filter: impl Into<String>) -> ChannelId {
        let channel = Channel::new(category_filter.into());
        let id = channel.channel_id.clone();
        self.channels.push(channel);
        id
    }

    /// Bump activity on one channel. Returns `false` for unknown or closed channels.
    pub fn record_activity(&mut self, channel_id: &ChannelId) -> bool {
        match self.get_mut(channel_id) {
            Some(channel) if channel.is_open => {
                channel.touch();
                true
            }
            _ => false,
        }
    }

    /// Attribute an inbound frame to every open channel matching `kind`.
    ///
    /// Returns how many channels matched.
    pub fn record_matching(&mut self, kind: &str, delivered: bool) -> usize {
        let mut matched = 0;
        for channel in self.channels.iter_mut().filter(|c| c.is_open && c.matches(kind)) {
            channel.touch();
            channel.settle(delivered);
            matched += 1;
        }
        matched
    }

    /// Close every channel, returning the filters of those that were open.
    pub fn close_all(&mut self) -> Vec<String> {
        let mut reopened = Vec::new();
        for channel in &mut self.channels {
            if channel.is_open {
                reopened.push(channel.category_filter.clone());
            }
            channel.close();
        }
        reopened
    }

    /// Look up a channel.
    pub fn get(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| &c.channel_id == channel_id)
    }

    fn get_mut(&mut self, channel_id: &ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| &c.channel_id == channel_id)
    }

    /// All channels in creation order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Total channels ever created.
    pub fn total(&self) -> usize {
        self.channels.len()
    }

    /// Channels still open.
    pub fn open_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_open).count()
    }
}
