//! # Channel and Radio Metadata Cache
//!
//! Captures the connected device's channel name table and LoRa configuration
//! once per session. The first capture wins; later packets carrying different
//! values never overwrite it, so normalisers can read the cells lock-free.
//! Hidden/allowed channel-name policy is exposed as helpers only; the
//! pipeline forwards names verbatim and consumers decide.

use crate::proto;
use log::info;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};

/// Ordered channel index → name table for one radio session.
#[derive(Default)]
pub struct ChannelTable {
    entries: OnceCell<Vec<(u32, String)>>,
}

impl ChannelTable {
    pub fn new() -> ChannelTable {
        ChannelTable::default()
    }

    /// Captures the channel table from the device's channel container.
    ///
    /// Role PRIMARY is forced to index 0 and falls back to
    /// `primary_fallback` (modem preset or configured channel name) when the
    /// settings carry no name. Role SECONDARY uses the reported index. The
    /// first successful capture per session is authoritative.
    pub fn capture(&self, channels: &[proto::Channel], primary_fallback: Option<&str>) {
        if self.entries.get().is_some() {
            return;
        }

        let mut table: Vec<(u32, String)> = Vec::new();
        let mut seen: Vec<u32> = Vec::new();
        for channel in channels {
            let role = proto::ChannelRole::try_from(channel.role).ok();
            let entry = match role {
                Some(proto::ChannelRole::Primary) => {
                    let name = settings_name(channel)
                        .or_else(|| primary_fallback.map(str::to_string));
                    name.map(|name| (0u32, name))
                }
                Some(proto::ChannelRole::Secondary) => {
                    let index = u32::try_from(channel.index).ok();
                    match (index, settings_name(channel)) {
                        (Some(index), Some(name)) => Some((index, name)),
                        _ => None,
                    }
                }
                _ => None,
            };
            if let Some((index, name)) = entry {
                if seen.contains(&index) {
                    continue;
                }
                seen.push(index);
                table.push((index, name));
            }
        }

        if table.is_empty() {
            return;
        }
        if self.entries.set(table).is_ok() {
            if let Some(entries) = self.entries.get() {
                info!("Captured channel metadata: {entries:?}");
            }
        }
    }

    /// Returns the cached `(index, name)` tuples.
    pub fn mappings(&self) -> &[(u32, String)] {
        self.entries.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the channel name for `index` when known.
    pub fn name(&self, index: u32) -> Option<&str> {
        self.mappings()
            .iter()
            .find(|(entry_index, _)| *entry_index == index)
            .map(|(_, name)| name.as_str())
    }
}

fn settings_name(channel: &proto::Channel) -> Option<String> {
    let name = channel.settings.as_ref()?.name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// LoRa frequency and modem preset for the connected radio.
#[derive(Default)]
pub struct RadioMeta {
    lora_freq: OnceCell<Value>,
    modem_preset: OnceCell<String>,
}

impl RadioMeta {
    pub fn new() -> RadioMeta {
        RadioMeta::default()
    }

    /// Captures frequency and preset from the device's LoRa config once.
    pub fn capture(&self, lora: &proto::LoRaConfig) {
        let mut updated = false;
        if self.lora_freq.get().is_none() {
            if let Some(freq) = region_frequency(lora) {
                updated |= self.lora_freq.set(freq).is_ok();
            }
        }
        if self.modem_preset.get().is_none() {
            if let Some(preset) = modem_preset_label(lora) {
                updated |= self.modem_preset.set(preset).is_ok();
            }
        }
        if updated {
            info!(
                "Captured LoRa radio metadata lora_freq={:?} modem_preset={:?}",
                self.lora_freq.get(),
                self.modem_preset.get()
            );
        }
    }

    /// Returns the cached frequency (integer MHz or region label).
    pub fn lora_freq(&self) -> Option<&Value> {
        self.lora_freq.get()
    }

    /// Returns the cached CamelCase modem preset.
    pub fn modem_preset(&self) -> Option<&str> {
        self.modem_preset.get().map(String::as_str)
    }

    /// Merges the captured fields into a record body.
    pub fn apply(&self, record: &mut Map<String, Value>) {
        if let Some(freq) = self.lora_freq.get() {
            record.insert("lora_freq".to_string(), freq.clone());
        }
        if let Some(preset) = self.modem_preset.get() {
            record.insert("modem_preset".to_string(), Value::String(preset.to_string()));
        }
    }

    /// Merges the captured fields into each inner node entry of a node upsert.
    pub fn apply_to_nodes(&self, payload: &mut Map<String, Value>) {
        for entry in payload.values_mut() {
            if let Value::Object(node) = entry {
                self.apply(node);
            }
        }
    }
}

/// Derives the LoRa frequency in MHz, or the region label, from the config.
///
/// A positive `override_frequency` wins and is floored to the MHz. Region
/// enum names contribute their first numeric fragment of at least 100, then
/// the last fragment of any size, then the bare label.
pub fn region_frequency(lora: &proto::LoRaConfig) -> Option<Value> {
    if lora.override_frequency > 0.0 {
        return Some(Value::from(lora.override_frequency.floor() as i64));
    }
    let region = proto::RegionCode::try_from(lora.region).ok()?;
    if region == proto::RegionCode::Unset {
        return None;
    }
    let name = region.name();
    let digits: Vec<i64> = name
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect();
    for &freq in &digits {
        if freq >= 100 {
            return Some(Value::from(freq));
        }
    }
    if let Some(&freq) = digits.last() {
        return Some(Value::from(freq));
    }
    Some(Value::String(name.to_string()))
}

/// Returns the CamelCase modem preset configured on `lora`.
pub fn modem_preset_label(lora: &proto::LoRaConfig) -> Option<String> {
    let preset = proto::ModemPreset::try_from(lora.modem_preset).ok()?;
    camelcase_enum_name(preset.name())
}

/// Converts `SCREAMING_SNAKE` enum names into `CamelCase` labels.
pub fn camelcase_enum_name(name: &str) -> Option<String> {
    let camel: String = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(head) => {
                    head.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect();
    if camel.is_empty() {
        None
    } else {
        Some(camel)
    }
}

/// Returns `true` when `name` is configured as hidden.
pub fn is_hidden_channel(hidden: &[String], name: Option<&str>) -> bool {
    let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) else {
        return false;
    };
    hidden.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

/// Returns `true` when `name` passes the configured allow list.
///
/// An empty allow list permits everything.
pub fn is_allowed_channel(allowed: &[String], name: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) else {
        return false;
    };
    allowed.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(index: i32, role: proto::ChannelRole, name: &str) -> proto::Channel {
        proto::Channel {
            index,
            role: role as i32,
            settings: Some(proto::ChannelSettings {
                name: name.to_string(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn primary_is_forced_to_index_zero() {
        let table = ChannelTable::new();
        table.capture(
            &[
                channel(3, proto::ChannelRole::Primary, "MeshBerlin"),
                channel(1, proto::ChannelRole::Secondary, "Privat"),
                channel(2, proto::ChannelRole::Disabled, "ignored"),
            ],
            None,
        );
        assert_eq!(table.name(0), Some("MeshBerlin"));
        assert_eq!(table.name(1), Some("Privat"));
        assert_eq!(table.name(2), None);
    }

    #[test]
    fn primary_falls_back_to_preset_name() {
        let table = ChannelTable::new();
        table.capture(
            &[channel(0, proto::ChannelRole::Primary, "  ")],
            Some("LongFast"),
        );
        assert_eq!(table.name(0), Some("LongFast"));
    }

    #[test]
    fn first_capture_is_authoritative() {
        let table = ChannelTable::new();
        table.capture(&[channel(0, proto::ChannelRole::Primary, "first")], None);
        table.capture(&[channel(0, proto::ChannelRole::Primary, "second")], None);
        assert_eq!(table.name(0), Some("first"));
    }

    #[test]
    fn region_frequency_prefers_override() {
        let lora = proto::LoRaConfig {
            override_frequency: 433.875,
            region: proto::RegionCode::Eu868 as i32,
            ..Default::default()
        };
        assert_eq!(region_frequency(&lora), Some(Value::from(433)));
    }

    #[test]
    fn region_frequency_parses_enum_digits() {
        let lora = proto::LoRaConfig {
            region: proto::RegionCode::Eu868 as i32,
            ..Default::default()
        };
        assert_eq!(region_frequency(&lora), Some(Value::from(868)));

        let us = proto::LoRaConfig {
            region: proto::RegionCode::Us as i32,
            ..Default::default()
        };
        assert_eq!(region_frequency(&us), Some(Value::from("US")));

        let lora24 = proto::LoRaConfig {
            region: proto::RegionCode::Lora24 as i32,
            ..Default::default()
        };
        assert_eq!(region_frequency(&lora24), Some(Value::from(24)));
    }

    #[test]
    fn preset_labels_are_camelcase() {
        assert_eq!(camelcase_enum_name("LONG_FAST"), Some("LongFast".to_string()));
        assert_eq!(
            camelcase_enum_name("MEDIUM_SLOW"),
            Some("MediumSlow".to_string())
        );
        assert_eq!(camelcase_enum_name("__"), None);
    }

    #[test]
    fn channel_policy_helpers() {
        let hidden = vec!["Secret".to_string()];
        assert!(is_hidden_channel(&hidden, Some("secret")));
        assert!(!is_hidden_channel(&hidden, Some("Public")));
        assert!(!is_hidden_channel(&hidden, None));

        let allowed = vec!["Berlin".to_string()];
        assert!(is_allowed_channel(&[], Some("anything")));
        assert!(is_allowed_channel(&allowed, Some("berlin")));
        assert!(!is_allowed_channel(&allowed, Some("other")));
        assert!(!is_allowed_channel(&allowed, None));
    }
}
