//! Channel reference data.
//!
//! A public channel id maps to whatever per-backend identifiers are known
//! for it: a direct manifest URL, a name+country pair on the secondary
//! provider, an internal key on the primary provider. None of these is
//! required; drivers report an unmapped channel as a failed attempt and the
//! chain moves on.

use std::collections::HashMap;

use crate::config::{ChannelEntry, UpstreamConfig};

/// Reference to an embed on the secondary provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedRef {
    pub name: String,
    pub country: String,
}

/// One public channel with its resolved per-backend keys.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub public_id: u32,
    pub direct_url: Option<String>,
    pub embed: Option<EmbedRef>,
    pub provider_key: Option<String>,
}

/// Static channel table: built-in starter set plus config overrides.
#[derive(Clone)]
pub struct ChannelTable {
    channels: HashMap<u32, Channel>,
}

impl ChannelTable {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let mut channels: HashMap<u32, Channel> = builtin_channels()
            .into_iter()
            .map(|c| (c.public_id, c))
            .collect();
        for entry in &config.channels {
            channels.insert(entry.id, channel_from_entry(entry));
        }
        Self { channels }
    }

    /// Always yields a channel; an id with no table entry resolves to a
    /// channel with no keys, which every driver reports as unmapped.
    pub fn resolve(&self, public_id: u32) -> Channel {
        self.channels.get(&public_id).cloned().unwrap_or(Channel {
            public_id,
            ..Channel::default()
        })
    }
}

fn channel_from_entry(entry: &ChannelEntry) -> Channel {
    let embed = match (&entry.embed_name, &entry.embed_country) {
        (Some(name), Some(country)) => Some(EmbedRef {
            name: name.clone(),
            country: country.clone(),
        }),
        _ => None,
    };
    Channel {
        public_id: entry.id,
        direct_url: entry.direct_url.clone(),
        embed,
        provider_key: entry.provider_key.clone(),
    }
}

/// Starter set shipped with the binary; operators extend or override it in
/// configuration.
fn builtin_channels() -> Vec<Channel> {
    vec![
        Channel {
            public_id: 325,
            direct_url: None,
            embed: Some(EmbedRef {
                name: "skysportsf1".to_string(),
                country: "uk".to_string(),
            }),
            provider_key: Some("premium325".to_string()),
        },
        Channel {
            public_id: 44,
            direct_url: None,
            embed: None,
            provider_key: Some("premium44".to_string()),
        },
        Channel {
            public_id: 588,
            direct_url: None,
            embed: Some(EmbedRef {
                name: "tnt1".to_string(),
                country: "uk".to_string(),
            }),
            provider_key: None,
        },
    ]
}
