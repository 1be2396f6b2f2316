// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker-lifetime memoization of codec instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BuiltinCodecFactory, Codec, CodecFactory, CodecKind, CodecSet};
use crate::config::CodecConfig;
use crate::sync::resilient_lock;

type SlotKey = (CodecKind, String);

/// Lazily constructs codecs and hands the same instances to every task.
///
/// Entries are keyed by kind and resource path, so two loads that ask for
/// the same decoder share it even if the rest of their configs differ.
/// A failed construction is memoized as an empty slot and logged once.
pub struct CodecRegistry {
    factory: Arc<dyn CodecFactory>,
    slots: Mutex<HashMap<SlotKey, Option<Arc<dyn Codec>>>>,
}

impl CodecRegistry {
    pub fn new(factory: Arc<dyn CodecFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a [`CodecSet`] for `config`, constructing missing codecs.
    ///
    /// Never fails: disabled kinds and kinds whose construction failed come
    /// back as empty slots.
    pub fn get_or_init(&self, config: &CodecConfig) -> CodecSet {
        let mut set = CodecSet::default();
        let mut slots = resilient_lock(&self.slots);

        for kind in CodecKind::ALL {
            let options = config.options(kind);
            if !options.enabled {
                tracing::debug!(codec = %kind, "Codec disabled by config");
                continue;
            }

            let key = (kind, options.resource_path.clone());
            let slot = slots.entry(key).or_insert_with(|| {
                match self.factory.create(kind, &options.resource_path) {
                    Ok(codec) => {
                        tracing::info!(codec = %kind, path = %options.resource_path, "Codec initialized");
                        Some(codec)
                    }
                    Err(e) => {
                        tracing::warn!(codec = %kind, "{}; loads needing it will fail", e);
                        None
                    }
                }
            });
            *set.slot_mut(kind) = slot.clone();
        }

        set
    }

    /// Number of memoized entries, including failed ones.
    pub fn len(&self) -> usize {
        resilient_lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every memoized codec. Tasks still holding a [`CodecSet`] keep
    /// their instances alive until they finish.
    pub fn clear(&self) {
        let mut slots = resilient_lock(&self.slots);
        tracing::debug!(entries = slots.len(), "Releasing codecs");
        slots.clear();
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinCodecFactory))
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
