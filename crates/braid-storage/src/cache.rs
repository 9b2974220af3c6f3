use std::collections::{BTreeMap, HashMap};

use braid_core::props::UnitProps;
use braid_core::types::{Mci, UnitHash};
use braid_core::unit::Message;

use braid_core::constants::{RETRIEVABLE_DEPTH, STABLE_CACHE_BUFFER};

/// Process-local caches, rebuilt on startup and mutated only inside the
/// writer's critical section. Every read that can miss MUST fall back to
/// the database — the cache is an accelerator, never the source of truth.
#[derive(Default)]
pub struct Caches {
    /// All unstable units.
    pub unstable_units: HashMap<UnitHash, UnitProps>,
    /// Recently stabilized units, within the retention window.
    pub stable_units: HashMap<UnitHash, UnitProps>,
    /// Stable units grouped by MCI, bounded window
    /// [min_retrievable_mci, last_stable_mci + buffer].
    pub stable_units_by_mci: BTreeMap<Mci, Vec<UnitHash>>,
    /// parent → children that chose it as best parent.
    pub best_children: HashMap<UnitHash, Vec<UnitHash>>,
    /// Selected messages of unstable units (data_feed, definition,
    /// system_vote, system_vote_count), for validators that must see
    /// not-yet-stable payloads.
    pub unstable_messages: HashMap<UnitHash, Vec<Message>>,
    pub last_stable_mci: Mci,
    pub min_retrievable_mci: Mci,
}

impl Caches {
    /// Props lookup across both unit maps. A miss means nothing: the caller
    /// falls back to the database.
    pub fn props(&self, unit: &UnitHash) -> Option<&UnitProps> {
        self.unstable_units
            .get(unit)
            .or_else(|| self.stable_units.get(unit))
    }

    pub fn insert_unstable(&mut self, props: UnitProps) {
        if let Some(best_parent) = &props.best_parent_unit {
            self.best_children
                .entry(best_parent.clone())
                .or_default()
                .push(props.unit.clone());
        }
        self.unstable_units.insert(props.unit.clone(), props);
    }

    pub fn update(&mut self, props: &UnitProps) {
        if let Some(entry) = self.unstable_units.get_mut(&props.unit) {
            *entry = props.clone();
        } else if let Some(entry) = self.stable_units.get_mut(&props.unit) {
            *entry = props.clone();
        }
    }

    /// Move a unit from the unstable to the stable side once the stabilizer
    /// has frozen its MCI.
    pub fn mark_stable(&mut self, props: &UnitProps, mci: Mci) {
        self.unstable_units.remove(&props.unit);
        self.unstable_messages.remove(&props.unit);
        self.stable_units.insert(props.unit.clone(), props.clone());
        self.stable_units_by_mci
            .entry(mci)
            .or_default()
            .push(props.unit.clone());
    }

    /// Advance the retention window, dropping pruned MCIs. Callers reading
    /// a pruned MCI must go to the database.
    pub fn advance_window(&mut self, last_stable_mci: Mci) {
        self.last_stable_mci = last_stable_mci;
        self.min_retrievable_mci = last_stable_mci.saturating_sub(RETRIEVABLE_DEPTH);
        let floor = self
            .min_retrievable_mci
            .saturating_sub(STABLE_CACHE_BUFFER);
        let pruned: Vec<Mci> = self
            .stable_units_by_mci
            .range(..floor)
            .map(|(mci, _)| *mci)
            .collect();
        for mci in pruned {
            if let Some(units) = self.stable_units_by_mci.remove(&mci) {
                for unit in units {
                    self.stable_units.remove(&unit);
                    self.best_children.remove(&unit);
                }
            }
        }
    }

    /// Units at a stable MCI, if that MCI is still inside the cache window.
    /// `None` does not mean "no units" — it means "ask the database".
    pub fn stable_units_at(&self, mci: Mci) -> Option<&Vec<UnitHash>> {
        self.stable_units_by_mci.get(&mci)
    }

    /// DAG tips. Stable units count too: right after genesis (and on a
    /// quiet network) the only free unit is a stable one.
    pub fn free_units(&self) -> Vec<&UnitProps> {
        self.unstable_units
            .values()
            .chain(self.stable_units.values())
            .filter(|p| p.is_free)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::Sequence;

    fn props(tag: char, mci: Option<Mci>) -> UnitProps {
        UnitProps {
            unit: UnitHash::new(tag.to_string().repeat(44)).unwrap(),
            level: 1,
            witnessed_level: 0,
            best_parent_unit: None,
            parent_units: vec![],
            witness_list_unit: None,
            last_ball_unit: None,
            is_on_main_chain: false,
            main_chain_index: mci,
            latest_included_mc_index: None,
            is_free: true,
            is_stable: false,
            sequence: Sequence::Good,
            author_addresses: vec![],
            timestamp: 0,
            headers_commission: 0,
            payload_commission: 0,
        }
    }

    #[test]
    fn pruned_mci_reads_as_none_not_empty() {
        let mut caches = Caches::default();
        let p = props('A', Some(5));
        caches.insert_unstable(p.clone());
        caches.mark_stable(&p, 5);
        assert!(caches.stable_units_at(5).is_some());
        // Window far past MCI 5: entry must be pruned, read must be None.
        caches.advance_window(5 + RETRIEVABLE_DEPTH + STABLE_CACHE_BUFFER + 10);
        assert!(caches.stable_units_at(5).is_none());
        assert!(caches.props(&p.unit).is_none());
    }

    #[test]
    fn stable_move_clears_unstable_side() {
        let mut caches = Caches::default();
        let p = props('B', Some(1));
        caches.insert_unstable(p.clone());
        assert!(caches.unstable_units.contains_key(&p.unit));
        caches.mark_stable(&p, 1);
        assert!(!caches.unstable_units.contains_key(&p.unit));
        assert!(caches.props(&p.unit).is_some());
    }
}
