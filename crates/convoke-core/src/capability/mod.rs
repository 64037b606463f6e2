//! Capability index: which experts provide which capabilities, and which
//! trigger phrases imply them.
//!
//! Two indexes are kept in lockstep under one read-write lock:
//! `capability -> [ExpertInfo]` and `trigger phrase -> [capability]`.
//! The map is owned by the orchestrator and rebuilt whenever the registry
//! changes; reads return defensive copies so callers never iterate while
//! holding the lock.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::expert::ExpertInfo;

#[derive(Debug, Default)]
struct Indexes {
    by_capability: HashMap<String, Vec<ExpertInfo>>,
    by_trigger: HashMap<String, Vec<String>>,
}

/// Concurrently readable capability/trigger index.
#[derive(Debug, Default)]
pub struct CapabilityMap {
    inner: RwLock<Indexes>,
}

/// Normalize a capability tag or trigger phrase: trim and lower-case.
fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Containment check for an ASCII needle with word boundaries enforced:
/// the bytes adjacent to a match must not be alphanumeric or underscore,
/// so `note` does not match inside `keynote`.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let hay = haystack.as_bytes();
    let ndl = needle.as_bytes();
    if ndl.is_empty() || ndl.len() > hay.len() {
        return false;
    }
    let mut at = 0;
    while at + ndl.len() <= hay.len() {
        if &hay[at..at + ndl.len()] == ndl {
            let before_ok = at == 0 || !is_word_byte(hay[at - 1]);
            let end = at + ndl.len();
            let after_ok = end == hay.len() || !is_word_byte(hay[end]);
            if before_ok && after_ok {
                return true;
            }
        }
        at += 1;
    }
    false
}

impl CapabilityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically rebuild both indexes from expert descriptors.
    ///
    /// Capability tags and trigger phrases are normalized; empty entries
    /// are dropped.
    pub fn build_from_configs(&self, configs: &[ExpertInfo]) {
        let mut next = Indexes::default();

        for config in configs {
            for capability in &config.capabilities {
                let capability = normalize(capability);
                if capability.is_empty() {
                    continue;
                }
                let providers = next.by_capability.entry(capability).or_default();
                if !providers.iter().any(|p| p.name == config.name) {
                    providers.push(config.clone());
                }
            }

            for (capability, phrases) in &config.triggers {
                let capability = normalize(capability);
                if capability.is_empty() {
                    continue;
                }
                for phrase in phrases {
                    let phrase = normalize(phrase);
                    if phrase.is_empty() {
                        continue;
                    }
                    let capabilities = next.by_trigger.entry(phrase).or_default();
                    if !capabilities.contains(&capability) {
                        capabilities.push(capability.clone());
                    }
                }
            }
        }

        *self.inner.write().unwrap() = next;
    }

    /// All experts providing the normalized capability.
    pub fn find_by_capability(&self, capability: &str) -> Vec<ExpertInfo> {
        let capability = normalize(capability);
        self.inner
            .read()
            .unwrap()
            .by_capability
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    /// All experts providing the capability, minus the excluded expert.
    pub fn find_alternatives(&self, capability: &str, exclude: &str) -> Vec<ExpertInfo> {
        self.find_by_capability(capability)
            .into_iter()
            .filter(|e| e.name != exclude)
            .collect()
    }

    /// Scan free-form text for registered trigger phrases and return the
    /// deduplicated, sorted set of capabilities they imply.
    ///
    /// ASCII triggers match only on word boundaries; triggers containing
    /// any non-ASCII byte (e.g. CJK) match by plain containment, since word
    /// boundaries are meaningless there.
    pub fn identify_capabilities(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        let inner = self.inner.read().unwrap();

        let mut found: Vec<String> = Vec::new();
        for (phrase, capabilities) in &inner.by_trigger {
            let matched = if phrase.is_ascii() {
                contains_word(&text, phrase)
            } else {
                text.contains(phrase.as_str())
            };
            if matched {
                for capability in capabilities {
                    if !found.contains(capability) {
                        found.push(capability.clone());
                    }
                }
            }
        }

        found.sort();
        found
    }
}
