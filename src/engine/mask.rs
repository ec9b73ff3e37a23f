//! Component-key bitsets.
//!
//! A [`Mask`] is the set of component ids carried by a table, or one of the
//! three filter sets of a query (required, excluded, any-of). Masks are
//! growable word vectors kept trimmed of trailing zero words, so two masks
//! with the same members compare and hash equal no matter how they were
//! built. That lets the archetype graph key its table index by `Mask`.
//!
//! Masks are rented from and returned to the shared
//! [`MaskPool`](crate::engine::pool::MaskPool) on hot structural paths.

use crate::engine::types::{ComponentID, MASK_WORD_BITS};

/// Set of component ids.
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct Mask {
    words: Vec<u64>,
}

#[inline]
fn split(component_id: ComponentID) -> (usize, u64) {
    let id = component_id as usize;
    (id / MASK_WORD_BITS, 1u64 << (id % MASK_WORD_BITS))
}

impl Mask {
    /// Creates an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mask from a list of ids.
    pub fn from_ids(ids: &[ComponentID]) -> Self {
        let mut mask = Self::new();
        for &id in ids {
            mask.add(id);
        }
        mask
    }

    /// Inserts `component_id`.
    #[inline]
    pub fn add(&mut self, component_id: ComponentID) {
        let (word, bit) = split(component_id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= bit;
    }

    /// Removes `component_id`.
    #[inline]
    pub fn remove(&mut self, component_id: ComponentID) {
        let (word, bit) = split(component_id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !bit;
            self.trim();
        }
    }

    /// Membership test.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let (word, bit) = split(component_id);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// Returns `true` if no id is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of ids set.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Empties the mask, keeping its allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Replaces the contents with those of `other`.
    pub fn copy_from(&mut self, other: &Mask) {
        self.words.clear();
        self.words.extend_from_slice(&other.words);
    }

    /// Adds every id of `other`.
    pub fn union_with(&mut self, other: &Mask) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= *o;
        }
    }

    /// `self ⊆ other`.
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.words.iter().enumerate().all(|(i, &w)| {
            let o = other.words.get(i).copied().unwrap_or(0);
            w & !o == 0
        })
    }

    /// `self ∩ other ≠ ∅`.
    pub fn intersects(&self, other: &Mask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(&a, &b)| a & b != 0)
    }

    /// Table-side filter test: every `required` id is present and no
    /// `excluded` id is.
    #[inline]
    pub fn matches(&self, required: &Mask, excluded: &Mask) -> bool {
        required.is_subset_of(self) && !excluded.intersects(self)
    }

    /// Any-of test; an empty `any` set matches every table.
    #[inline]
    pub fn matches_any(&self, any: &Mask) -> bool {
        any.is_empty() || any.intersects(self)
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((i * MASK_WORD_BITS + tz) as ComponentID)
            })
        })
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}
