//! Feature slot registry: global track id ↔ dense local slot.
//!
//! Slots are the positions of feature blocks inside the state and covariance.
//! They always form the dense range `[0, len)`: insertion appends, removal
//! compacts later slots down by one. The registry only does the bookkeeping;
//! [`super::ViEkf::init_feature`] and [`super::ViEkf::clear_feature`] resize
//! the state and covariance in the same call.

use tracing::debug;

use crate::error::FilterError;

use super::types::FeatureId;

#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    /// `ids[slot]` is the feature occupying `slot`.
    ids: Vec<FeatureId>,
    max_features: usize,
}

impl FeatureRegistry {
    /// Empty registry holding at most `max_features` ids.
    pub fn with_capacity(max_features: usize) -> Self {
        Self {
            ids: Vec::with_capacity(max_features),
            max_features,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.max_features
    }

    /// Local slot of `id`, or `None` when the feature is not tracked.
    pub fn global_to_local(&self, id: FeatureId) -> Option<usize> {
        self.ids.iter().position(|&tracked| tracked == id)
    }

    /// Feature occupying `slot`, or `None` past the last occupied slot.
    pub fn local_to_global(&self, slot: usize) -> Option<FeatureId> {
        self.ids.get(slot).copied()
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.global_to_local(id).is_some()
    }

    /// Tracked ids in slot order.
    pub fn ids(&self) -> &[FeatureId] {
        &self.ids
    }

    /// `(slot, id)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, FeatureId)> + '_ {
        self.ids.iter().copied().enumerate()
    }

    /// Claim the next slot for `id`.
    pub(crate) fn insert(&mut self, id: FeatureId) -> Result<usize, FilterError> {
        if self.contains(id) {
            return Err(FilterError::DuplicateFeature(id));
        }
        if self.is_full() {
            return Err(FilterError::CapacityExhausted {
                max: self.max_features,
            });
        }
        self.ids.push(id);
        let slot = self.ids.len() - 1;
        debug!("feature {} -> slot {}", id, slot);
        Ok(slot)
    }

    /// Release the slot of `id`, returning the slot it occupied.
    pub(crate) fn remove(&mut self, id: FeatureId) -> Option<usize> {
        let slot = self.global_to_local(id)?;
        self.ids.remove(slot);
        debug!("feature {} released slot {} ({} remain)", id, slot, self.ids.len());
        Some(slot)
    }
}
