use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use braid_core::error::BraidError;
use braid_core::joint::Joint;
use braid_core::props::UnitProps;
use braid_core::types::{Address, Amount, Mci, UnitHash};
use braid_core::types::Ball;
use braid_core::unit::{App, Message};

use crate::cache::Caches;
use crate::rows::{
    AaResponseRow, AaRow, ArchivalReason, AssetRow, CommissionOutputRow, DefinitionRow,
    OutputRow, TriggerRow, UnhandledJoint,
};

fn storage_err(e: sled::Error) -> BraidError {
    BraidError::Storage(e.to_string())
}

fn bin_enc<T: Serialize>(value: &T) -> Result<Vec<u8>, BraidError> {
    bincode::serialize(value).map_err(|e| BraidError::Serialization(e.to_string()))
}

fn bin_dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BraidError> {
    bincode::deserialize(bytes).map_err(|e| BraidError::Serialization(e.to_string()))
}

/// Rows carrying dynamic JSON (definitions, templates, joints) go through
/// serde_json; bincode cannot round-trip self-describing values.
fn json_enc<T: Serialize>(value: &T) -> Result<Vec<u8>, BraidError> {
    serde_json::to_vec(value).map_err(|e| BraidError::Serialization(e.to_string()))
}

fn json_dec<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BraidError> {
    serde_json::from_slice(bytes).map_err(|e| BraidError::Serialization(e.to_string()))
}

fn composite_key(parts: &[&[u8]]) -> Vec<u8> {
    parts.join(&0u8)
}

fn asset_key_part(asset: &Option<UnitHash>) -> Vec<u8> {
    match asset {
        Some(unit) => unit.as_bytes().to_vec(),
        None => b"base".to_vec(),
    }
}

/// Persistent ledger backed by sled (pure-Rust, no C dependencies).
///
/// Named trees (relational-style rows + the raw KV joint store):
///   units             — unit bytes            → bincode(UnitProps)
///   units_by_mci      — mci be ++ unit        → [] (membership)
///   joints            — "j\n" ++ unit         → json(Joint)
///   balls             — unit bytes            → ball bytes
///   balls_by_ball     — ball bytes            → unit bytes
///   children          — parent ⊕ child        → [] (membership)
///   definitions       — chash bytes           → json(DefinitionRow)
///   definition_changes— address ⊕ mci be      → chash bytes
///   outputs           — unit ⊕ msg be ⊕ out be→ bincode(OutputRow)
///   outputs_by_address— addr ⊕ asset ⊕ outkey → [] (membership)
///   spent_flags       — asset ⊕ outkey        → spender unit bytes
///   spend_proofs      — proof bytes           → bincode((Address, UnitHash))
///   assets            — asset unit bytes      → json(AssetRow)
///   data_feeds        — df-keys               → unit bytes
///   aa_addresses      — address bytes         → json(AaRow)
///   aa_balances       — address ⊕ asset       → amount be bytes
///   aa_state_vars     — address ⊕ var         → json value bytes
///   aa_triggers       — mci be ⊕ unit         → json(TriggerRow)
///   aa_responses      — trigger ⊕ seq be      → json(AaResponseRow)
///   hc_outputs        — address ⊕ mci be      → bincode(CommissionOutputRow)
///   witnessing_outputs— address ⊕ mci be      → bincode(CommissionOutputRow)
///   tps_fee_balances  — address bytes         → i64 be bytes
///   witness_lists     — unit bytes            → bincode(Vec<Address>)
///   main_chain        — mci be                → unit bytes
///   unhandled_joints  — unit bytes            → json(UnhandledJoint)
///   dependencies      — dep ⊕ waiting         → [] (membership)
///   archived_joints   — unit bytes            → json(ArchivalReason)
///   hash_tree_balls   — ball bytes            → unit bytes
///   catchup_balls     — seq be                → ball bytes
///   meta              — utf8 key              → raw bytes
pub struct Ledger {
    db: sled::Db,
    units: sled::Tree,
    units_by_mci: sled::Tree,
    joints: sled::Tree,
    balls: sled::Tree,
    balls_by_ball: sled::Tree,
    children: sled::Tree,
    definitions: sled::Tree,
    definition_changes: sled::Tree,
    outputs: sled::Tree,
    outputs_by_address: sled::Tree,
    spent_flags: sled::Tree,
    spend_proofs: sled::Tree,
    assets: sled::Tree,
    data_feeds: sled::Tree,
    aa_addresses: sled::Tree,
    aa_balances: sled::Tree,
    aa_state_vars: sled::Tree,
    aa_triggers: sled::Tree,
    aa_responses: sled::Tree,
    hc_outputs: sled::Tree,
    witnessing_outputs: sled::Tree,
    tps_fee_balances: sled::Tree,
    witness_lists: sled::Tree,
    author_units: sled::Tree,
    attestations: sled::Tree,
    main_chain: sled::Tree,
    unhandled_joints: sled::Tree,
    dependencies: sled::Tree,
    archived_joints: sled::Tree,
    hash_tree_balls: sled::Tree,
    catchup_balls: sled::Tree,
    meta: sled::Tree,
    pub caches: RwLock<Caches>,
}

impl Ledger {
    /// Open or create the ledger at `path`, run pending schema migrations,
    /// then warm the in-memory caches.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BraidError> {
        let db = sled::open(path).map_err(storage_err)?;
        let units = db.open_tree("units").map_err(storage_err)?;
        let units_by_mci = db.open_tree("units_by_mci").map_err(storage_err)?;
        let joints = db.open_tree("joints").map_err(storage_err)?;
        let balls = db.open_tree("balls").map_err(storage_err)?;
        let balls_by_ball = db.open_tree("balls_by_ball").map_err(storage_err)?;
        let children = db.open_tree("children").map_err(storage_err)?;
        let definitions = db.open_tree("definitions").map_err(storage_err)?;
        let definition_changes = db.open_tree("definition_changes").map_err(storage_err)?;
        let outputs = db.open_tree("outputs").map_err(storage_err)?;
        let outputs_by_address = db.open_tree("outputs_by_address").map_err(storage_err)?;
        let spent_flags = db.open_tree("spent_flags").map_err(storage_err)?;
        let spend_proofs = db.open_tree("spend_proofs").map_err(storage_err)?;
        let assets = db.open_tree("assets").map_err(storage_err)?;
        let data_feeds = db.open_tree("data_feeds").map_err(storage_err)?;
        let aa_addresses = db.open_tree("aa_addresses").map_err(storage_err)?;
        let aa_balances = db.open_tree("aa_balances").map_err(storage_err)?;
        let aa_state_vars = db.open_tree("aa_state_vars").map_err(storage_err)?;
        let aa_triggers = db.open_tree("aa_triggers").map_err(storage_err)?;
        let aa_responses = db.open_tree("aa_responses").map_err(storage_err)?;
        let hc_outputs = db.open_tree("hc_outputs").map_err(storage_err)?;
        let witnessing_outputs = db.open_tree("witnessing_outputs").map_err(storage_err)?;
        let tps_fee_balances = db.open_tree("tps_fee_balances").map_err(storage_err)?;
        let witness_lists = db.open_tree("witness_lists").map_err(storage_err)?;
        let author_units = db.open_tree("author_units").map_err(storage_err)?;
        let attestations = db.open_tree("attestations").map_err(storage_err)?;
        let main_chain = db.open_tree("main_chain").map_err(storage_err)?;
        let unhandled_joints = db.open_tree("unhandled_joints").map_err(storage_err)?;
        let dependencies = db.open_tree("dependencies").map_err(storage_err)?;
        let archived_joints = db.open_tree("archived_joints").map_err(storage_err)?;
        let hash_tree_balls = db.open_tree("hash_tree_balls").map_err(storage_err)?;
        let catchup_balls = db.open_tree("catchup_balls").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;
        let ledger = Self {
            db,
            units,
            units_by_mci,
            joints,
            balls,
            balls_by_ball,
            children,
            definitions,
            definition_changes,
            outputs,
            outputs_by_address,
            spent_flags,
            spend_proofs,
            assets,
            data_feeds,
            aa_addresses,
            aa_balances,
            aa_state_vars,
            aa_triggers,
            aa_responses,
            hc_outputs,
            witnessing_outputs,
            tps_fee_balances,
            witness_lists,
            author_units,
            attestations,
            main_chain,
            unhandled_joints,
            dependencies,
            archived_joints,
            hash_tree_balls,
            catchup_balls,
            meta,
            caches: RwLock::new(Caches::default()),
        };
        crate::migrations::migrate(&ledger)?;
        ledger.warm_caches()?;
        Ok(ledger)
    }

    fn warm_caches(&self) -> Result<(), BraidError> {
        let last_stable_mci = self.last_stable_mci()?;
        let mut caches = self
            .caches
            .write()
            .map_err(|_| BraidError::Internal("caches lock poisoned".into()))?;
        caches.advance_window(last_stable_mci);
        let floor = caches.min_retrievable_mci;
        let mut unstable = 0usize;
        for item in self.units.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let props: UnitProps = bin_dec(&bytes)?;
            if !props.is_stable {
                caches.insert_unstable(props);
                unstable += 1;
            } else if props.main_chain_index.unwrap_or(0) >= floor {
                let mci = props.main_chain_index.unwrap_or(0);
                caches.stable_units.insert(props.unit.clone(), props.clone());
                caches
                    .stable_units_by_mci
                    .entry(mci)
                    .or_default()
                    .push(props.unit.clone());
            }
        }
        info!(
            unstable,
            last_stable_mci, "ledger caches warmed"
        );
        Ok(())
    }

    pub fn flush(&self) -> Result<(), BraidError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    fn caches_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Caches>, BraidError> {
        self.caches
            .read()
            .map_err(|_| BraidError::Internal("caches lock poisoned".into()))
    }

    pub fn caches_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Caches>, BraidError> {
        self.caches
            .write()
            .map_err(|_| BraidError::Internal("caches lock poisoned".into()))
    }

    // ── Unit props ───────────────────────────────────────────────────────────

    pub fn unit_exists(&self, unit: &UnitHash) -> bool {
        if let Ok(caches) = self.caches_read() {
            if caches.props(unit).is_some() {
                return true;
            }
        }
        self.units.contains_key(unit.as_bytes()).unwrap_or(false)
    }

    /// Props for a unit: cache first, database fallback.
    pub fn unit_props(&self, unit: &UnitHash) -> Result<Option<UnitProps>, BraidError> {
        if let Some(props) = self.caches_read()?.props(unit) {
            return Ok(Some(props.clone()));
        }
        match self.units.get(unit.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bin_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Props that must exist; absence is an internal-consistency error
    /// naming the unit.
    pub fn expect_unit_props(&self, unit: &UnitHash) -> Result<UnitProps, BraidError> {
        self.unit_props(unit)?
            .ok_or_else(|| BraidError::Internal(format!("no props for unit {unit}")))
    }

    /// Insert a freshly written unit. Caller holds the write lock.
    pub fn save_unit_props(&self, props: &UnitProps) -> Result<(), BraidError> {
        self.units
            .insert(props.unit.as_bytes(), bin_enc(props)?)
            .map_err(storage_err)?;
        if let Some(mci) = props.main_chain_index {
            self.units_by_mci
                .insert(
                    composite_key(&[&mci.to_be_bytes(), props.unit.as_bytes()]),
                    &[],
                )
                .map_err(storage_err)?;
        }
        for parent in &props.parent_units {
            self.children
                .insert(
                    composite_key(&[parent.as_bytes(), props.unit.as_bytes()]),
                    &[],
                )
                .map_err(storage_err)?;
            // a parent with a child is no longer free
            if let Some(mut parent_props) = self.unit_props(parent)? {
                if parent_props.is_free {
                    parent_props.is_free = false;
                    self.write_props(&parent_props)?;
                }
            }
        }
        self.caches_write()?.insert_unstable(props.clone());
        Ok(())
    }

    fn write_props(&self, props: &UnitProps) -> Result<(), BraidError> {
        self.units
            .insert(props.unit.as_bytes(), bin_enc(props)?)
            .map_err(storage_err)?;
        self.caches_write()?.update(props);
        Ok(())
    }

    /// Read-modify-write on a unit's props, keeping cache and index rows
    /// coherent.
    pub fn update_props<F>(&self, unit: &UnitHash, mutate: F) -> Result<UnitProps, BraidError>
    where
        F: FnOnce(&mut UnitProps),
    {
        let mut props = self.expect_unit_props(unit)?;
        let old_mci = props.main_chain_index;
        mutate(&mut props);
        if old_mci != props.main_chain_index {
            if let Some(mci) = old_mci {
                self.units_by_mci
                    .remove(composite_key(&[&mci.to_be_bytes(), unit.as_bytes()]))
                    .map_err(storage_err)?;
            }
            if let Some(mci) = props.main_chain_index {
                self.units_by_mci
                    .insert(
                        composite_key(&[&mci.to_be_bytes(), unit.as_bytes()]),
                        &[],
                    )
                    .map_err(storage_err)?;
            }
        }
        self.write_props(&props)?;
        Ok(props)
    }

    /// All units assigned a given MCI. Serves both unstable (during MC
    /// rebuild) and stable ranges; stable reads prefer the cache window and
    /// fall back to the index scan when pruned.
    pub fn units_at_mci(&self, mci: Mci) -> Result<Vec<UnitProps>, BraidError> {
        // clone out of the guard before chasing props: expect_unit_props
        // takes the cache lock again
        let cached: Option<Vec<UnitHash>> =
            self.caches_read()?.stable_units_at(mci).cloned();
        if let Some(units) = cached {
            let mut result = Vec::with_capacity(units.len());
            for unit in &units {
                result.push(self.expect_unit_props(unit)?);
            }
            return Ok(result);
        }
        let mut result = Vec::new();
        let prefix = {
            let mut p = mci.to_be_bytes().to_vec();
            p.push(0);
            p
        };
        for item in self.units_by_mci.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let unit_bytes = &key[prefix.len()..];
            let unit = UnitHash::new(String::from_utf8_lossy(unit_bytes).to_string())?;
            result.push(self.expect_unit_props(&unit)?);
        }
        Ok(result)
    }

    /// Current DAG tips (units with no children).
    pub fn free_units(&self) -> Result<Vec<UnitProps>, BraidError> {
        Ok(self
            .caches_read()?
            .free_units()
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn children_of(&self, parent: &UnitHash) -> Result<Vec<UnitHash>, BraidError> {
        let mut prefix = parent.as_bytes().to_vec();
        prefix.push(0);
        let mut result = Vec::new();
        for item in self.children.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let child = UnitHash::new(String::from_utf8_lossy(&key[prefix.len()..]).to_string())?;
            result.push(child);
        }
        Ok(result)
    }

    /// Children that chose `parent` as best parent: cache when present,
    /// recomputed from the children index otherwise.
    pub fn best_children_of(&self, parent: &UnitHash) -> Result<Vec<UnitHash>, BraidError> {
        if let Some(list) = self.caches_read()?.best_children.get(parent) {
            return Ok(list.clone());
        }
        let mut result = Vec::new();
        for child in self.children_of(parent)? {
            let props = self.expect_unit_props(&child)?;
            if props.best_parent_unit.as_ref() == Some(parent) {
                result.push(child);
            }
        }
        Ok(result)
    }

    // ── Joints (KV store) ────────────────────────────────────────────────────

    fn joint_key(unit: &UnitHash) -> Vec<u8> {
        let mut key = b"j\n".to_vec();
        key.extend_from_slice(unit.as_bytes());
        key
    }

    pub fn put_joint(&self, joint: &Joint) -> Result<(), BraidError> {
        self.joints
            .insert(Self::joint_key(joint.unit_hash()), json_enc(joint)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn joint(&self, unit: &UnitHash) -> Result<Option<Joint>, BraidError> {
        match self.joints.get(Self::joint_key(unit)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Balls ────────────────────────────────────────────────────────────────

    pub fn put_ball(&self, unit: &UnitHash, ball: &Ball) -> Result<(), BraidError> {
        self.balls
            .insert(unit.as_bytes(), ball.as_bytes())
            .map_err(storage_err)?;
        self.balls_by_ball
            .insert(ball.as_bytes(), unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn ball_of(&self, unit: &UnitHash) -> Result<Option<Ball>, BraidError> {
        match self.balls.get(unit.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(Ball::new(String::from_utf8_lossy(&bytes).to_string())?)),
            None => Ok(None),
        }
    }

    pub fn unit_of_ball(&self, ball: &Ball) -> Result<Option<UnitHash>, BraidError> {
        match self.balls_by_ball.get(ball.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(UnitHash::new(
                String::from_utf8_lossy(&bytes).to_string(),
            )?)),
            None => Ok(None),
        }
    }

    // ── Definitions ──────────────────────────────────────────────────────────

    pub fn store_definition(&self, chash: &Address, row: &DefinitionRow) -> Result<(), BraidError> {
        self.definitions
            .insert(chash.as_bytes(), json_enc(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn definition(&self, chash: &Address) -> Result<Option<DefinitionRow>, BraidError> {
        match self.definitions.get(chash.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record that `address` switched to definition `chash` at stable `mci`.
    pub fn record_definition_change(
        &self,
        address: &Address,
        chash: &Address,
        mci: Mci,
    ) -> Result<(), BraidError> {
        self.definition_changes
            .insert(
                composite_key(&[address.as_bytes(), &mci.to_be_bytes()]),
                chash.as_bytes(),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// The definition chash active for `address` at `max_mci`. `max_mci`
    /// must come from a stable unit — callers verify stability of the
    /// referenced last_ball_unit first.
    pub fn definition_chash_at(
        &self,
        address: &Address,
        max_mci: Mci,
    ) -> Result<Address, BraidError> {
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        let mut latest: Option<(Mci, Address)> = None;
        for item in self.definition_changes.scan_prefix(&prefix) {
            let (key, value) = item.map_err(storage_err)?;
            let mci_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| BraidError::Internal("bad definition_changes key".into()))?;
            let mci = Mci::from_be_bytes(mci_bytes);
            if mci <= max_mci {
                let chash = Address::new(String::from_utf8_lossy(&value).to_string())?;
                latest = Some((mci, chash));
            }
        }
        Ok(latest.map(|(_, chash)| chash).unwrap_or_else(|| address.clone()))
    }

    pub fn has_definition_change(
        &self,
        address: &Address,
        chash: &Address,
        max_mci: Mci,
    ) -> Result<bool, BraidError> {
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        for item in self.definition_changes.scan_prefix(&prefix) {
            let (key, value) = item.map_err(storage_err)?;
            let mci_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| BraidError::Internal("bad definition_changes key".into()))?;
            if Mci::from_be_bytes(mci_bytes) <= max_mci && value.as_ref() == chash.as_bytes() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Outputs ──────────────────────────────────────────────────────────────

    fn output_key(unit: &UnitHash, message_index: u32, output_index: u32) -> Vec<u8> {
        composite_key(&[
            unit.as_bytes(),
            &message_index.to_be_bytes(),
            &output_index.to_be_bytes(),
        ])
    }

    pub fn put_output(
        &self,
        unit: &UnitHash,
        message_index: u32,
        output_index: u32,
        row: &OutputRow,
    ) -> Result<(), BraidError> {
        let key = Self::output_key(unit, message_index, output_index);
        self.outputs.insert(&key, bin_enc(row)?).map_err(storage_err)?;
        self.outputs_by_address
            .insert(
                composite_key(&[row.address.as_bytes(), &asset_key_part(&row.asset), &key]),
                &[],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn output(
        &self,
        unit: &UnitHash,
        message_index: u32,
        output_index: u32,
    ) -> Result<Option<OutputRow>, BraidError> {
        match self
            .outputs
            .get(Self::output_key(unit, message_index, output_index))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bin_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record that `spender` claims the output. Multiple unstable units may
    /// claim the same output; the stabilizer resolves the winner by
    /// (MCI, unit hash), never by arrival order, so resolution is identical
    /// on every node. Returns the other claimants seen so far.
    pub fn add_spend_claim(
        &self,
        asset: &Option<UnitHash>,
        unit: &UnitHash,
        message_index: u32,
        output_index: u32,
        spender: &UnitHash,
    ) -> Result<Vec<UnitHash>, BraidError> {
        let others = self.spend_claimants(asset, unit, message_index, output_index)?;
        let key = composite_key(&[
            &asset_key_part(asset),
            &Self::output_key(unit, message_index, output_index),
            spender.as_bytes(),
        ]);
        self.spent_flags.insert(&key, &[]).map_err(storage_err)?;
        Ok(others.into_iter().filter(|u| u != spender).collect())
    }

    /// All units claiming the output, sorted by unit hash.
    pub fn spend_claimants(
        &self,
        asset: &Option<UnitHash>,
        unit: &UnitHash,
        message_index: u32,
        output_index: u32,
    ) -> Result<Vec<UnitHash>, BraidError> {
        let mut prefix = composite_key(&[
            &asset_key_part(asset),
            &Self::output_key(unit, message_index, output_index),
        ]);
        prefix.push(0);
        let mut result = Vec::new();
        for item in self.spent_flags.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            result.push(UnitHash::new(
                String::from_utf8_lossy(&key[prefix.len()..]).to_string(),
            )?);
        }
        result.sort();
        Ok(result)
    }

    /// Flip an output's is_spent to 1. Called at stabilization for the
    /// winning spender only — the 0→1 transition happens exactly once.
    pub fn mark_output_spent(
        &self,
        unit: &UnitHash,
        message_index: u32,
        output_index: u32,
    ) -> Result<(), BraidError> {
        let out_key = Self::output_key(unit, message_index, output_index);
        if let Some(bytes) = self.outputs.get(&out_key).map_err(storage_err)? {
            let mut row: OutputRow = bin_dec(&bytes)?;
            row.is_spent = true;
            self.outputs
                .insert(&out_key, bin_enc(&row)?)
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Unspent outputs held by `address` in `asset`, with their locations.
    pub fn unspent_outputs(
        &self,
        address: &Address,
        asset: &Option<UnitHash>,
    ) -> Result<Vec<(UnitHash, u32, u32, OutputRow)>, BraidError> {
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        prefix.extend_from_slice(&asset_key_part(asset));
        prefix.push(0);
        let mut result = Vec::new();
        for item in self.outputs_by_address.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let out_key = &key[prefix.len()..];
            // out_key = unit ⊕ msg be ⊕ out be
            let unit_len = braid_core::constants::HASH_LENGTH;
            if out_key.len() != unit_len + 1 + 4 + 1 + 4 {
                return Err(BraidError::Internal("bad outputs_by_address key".into()));
            }
            let unit = UnitHash::new(String::from_utf8_lossy(&out_key[..unit_len]).to_string())?;
            let msg = u32::from_be_bytes(
                out_key[unit_len + 1..unit_len + 5]
                    .try_into()
                    .map_err(|_| BraidError::Internal("bad output key".into()))?,
            );
            let out = u32::from_be_bytes(
                out_key[unit_len + 6..]
                    .try_into()
                    .map_err(|_| BraidError::Internal("bad output key".into()))?,
            );
            if let Some(row) = self.output(&unit, msg, out)? {
                // an output with an outstanding claim is already promised to
                // an unstable spender, even though is_spent has not flipped
                if !row.is_spent && self.spend_claimants(asset, &unit, msg, out)?.is_empty() {
                    result.push((unit, msg, out, row));
                }
            }
        }
        Ok(result)
    }

    // ── Spend proofs ─────────────────────────────────────────────────────────

    pub fn put_spend_proof(
        &self,
        proof: &str,
        address: &Address,
        unit: &UnitHash,
    ) -> Result<(), BraidError> {
        self.spend_proofs
            .insert(proof.as_bytes(), bin_enc(&(address.clone(), unit.clone()))?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// The unit that already published this spend proof, if any.
    pub fn spend_proof_owner(&self, proof: &str) -> Result<Option<UnitHash>, BraidError> {
        match self.spend_proofs.get(proof.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let (_, unit): (Address, UnitHash) = bin_dec(&bytes)?;
                Ok(Some(unit))
            }
            None => Ok(None),
        }
    }

    // ── Assets ───────────────────────────────────────────────────────────────

    pub fn put_asset(&self, asset: &UnitHash, row: &AssetRow) -> Result<(), BraidError> {
        self.assets
            .insert(asset.as_bytes(), json_enc(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn asset(&self, asset: &UnitHash) -> Result<Option<AssetRow>, BraidError> {
        match self.assets.get(asset.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Data feeds ───────────────────────────────────────────────────────────

    pub fn index_data_feed_entry(&self, key: Vec<u8>, unit: &UnitHash) -> Result<(), BraidError> {
        self.data_feeds
            .insert(key, unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn data_feed_entry_exists(&self, key: &[u8]) -> Result<bool, BraidError> {
        Ok(self.data_feeds.contains_key(key).map_err(storage_err)?)
    }

    pub fn scan_data_feed(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, UnitHash)>, BraidError> {
        let mut result = Vec::new();
        for item in self.data_feeds.scan_prefix(prefix) {
            let (key, value) = item.map_err(storage_err)?;
            let unit = UnitHash::new(String::from_utf8_lossy(&value).to_string())?;
            result.push((key.to_vec(), unit));
        }
        Ok(result)
    }

    // ── Autonomous agents ────────────────────────────────────────────────────

    pub fn put_aa(&self, row: &AaRow) -> Result<(), BraidError> {
        self.aa_addresses
            .insert(row.address.as_bytes(), json_enc(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn aa(&self, address: &Address) -> Result<Option<AaRow>, BraidError> {
        match self
            .aa_addresses
            .get(address.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_aa(&self, address: &Address) -> bool {
        self.aa_addresses
            .contains_key(address.as_bytes())
            .unwrap_or(false)
    }

    pub fn aa_balance(&self, address: &Address, asset: &str) -> Result<Amount, BraidError> {
        let key = composite_key(&[address.as_bytes(), asset.as_bytes()]);
        match self.aa_balances.get(&key).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| BraidError::Internal("bad aa_balances value".into()))?;
                Ok(Amount::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    pub fn set_aa_balance(
        &self,
        address: &Address,
        asset: &str,
        amount: Amount,
    ) -> Result<(), BraidError> {
        let key = composite_key(&[address.as_bytes(), asset.as_bytes()]);
        self.aa_balances
            .insert(&key, &amount.to_be_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn aa_state_var(
        &self,
        address: &Address,
        var: &str,
    ) -> Result<Option<serde_json::Value>, BraidError> {
        let key = composite_key(&[address.as_bytes(), var.as_bytes()]);
        match self.aa_state_vars.get(&key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_aa_state_var(
        &self,
        address: &Address,
        var: &str,
        value: Option<&serde_json::Value>,
    ) -> Result<(), BraidError> {
        let key = composite_key(&[address.as_bytes(), var.as_bytes()]);
        match value {
            Some(v) => {
                self.aa_state_vars
                    .insert(&key, json_enc(v)?)
                    .map_err(storage_err)?;
            }
            None => {
                self.aa_state_vars.remove(&key).map_err(storage_err)?;
            }
        }
        Ok(())
    }

    pub fn queue_aa_trigger(&self, trigger: &TriggerRow) -> Result<(), BraidError> {
        let key = composite_key(&[
            &trigger.main_chain_index.to_be_bytes(),
            trigger.unit.as_bytes(),
        ]);
        self.aa_triggers
            .insert(&key, json_enc(trigger)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn take_aa_triggers_at(&self, mci: Mci) -> Result<Vec<TriggerRow>, BraidError> {
        let mut prefix = mci.to_be_bytes().to_vec();
        prefix.push(0);
        let mut result = Vec::new();
        let mut keys = Vec::new();
        for item in self.aa_triggers.scan_prefix(&prefix) {
            let (key, bytes) = item.map_err(storage_err)?;
            result.push(json_dec(&bytes)?);
            keys.push(key);
        }
        for key in keys {
            self.aa_triggers.remove(key).map_err(storage_err)?;
        }
        Ok(result)
    }

    pub fn put_aa_response(&self, seq: u32, row: &AaResponseRow) -> Result<(), BraidError> {
        let key = composite_key(&[row.trigger_unit.as_bytes(), &seq.to_be_bytes()]);
        self.aa_responses
            .insert(&key, json_enc(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn aa_responses_for(&self, trigger: &UnitHash) -> Result<Vec<AaResponseRow>, BraidError> {
        let mut prefix = trigger.as_bytes().to_vec();
        prefix.push(0);
        let mut result = Vec::new();
        for item in self.aa_responses.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(json_dec(&bytes)?);
        }
        Ok(result)
    }

    // ── Commission outputs ───────────────────────────────────────────────────

    pub fn put_headers_commission_output(
        &self,
        address: &Address,
        mci: Mci,
        amount: Amount,
    ) -> Result<(), BraidError> {
        self.put_commission(&self.hc_outputs, address, mci, amount)
    }

    pub fn put_witnessing_output(
        &self,
        address: &Address,
        mci: Mci,
        amount: Amount,
    ) -> Result<(), BraidError> {
        self.put_commission(&self.witnessing_outputs, address, mci, amount)
    }

    fn put_commission(
        &self,
        tree: &sled::Tree,
        address: &Address,
        mci: Mci,
        amount: Amount,
    ) -> Result<(), BraidError> {
        let key = composite_key(&[address.as_bytes(), &mci.to_be_bytes()]);
        let row = match tree.get(&key).map_err(storage_err)? {
            Some(bytes) => {
                let mut existing: CommissionOutputRow = bin_dec(&bytes)?;
                existing.amount += amount;
                existing
            }
            None => CommissionOutputRow {
                amount,
                is_spent: false,
            },
        };
        tree.insert(&key, bin_enc(&row)?).map_err(storage_err)?;
        Ok(())
    }

    /// Sum and mark spent the commission outputs of `address` in
    /// [from_mci, to_mci]. Returns the swept amount.
    pub fn sweep_commission_range(
        &self,
        witnessing: bool,
        address: &Address,
        from_mci: Mci,
        to_mci: Mci,
    ) -> Result<Amount, BraidError> {
        let tree = if witnessing {
            &self.witnessing_outputs
        } else {
            &self.hc_outputs
        };
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        let mut total = 0u64;
        let mut updates = Vec::new();
        for item in tree.scan_prefix(&prefix) {
            let (key, bytes) = item.map_err(storage_err)?;
            let mci_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| BraidError::Internal("bad commission key".into()))?;
            let mci = Mci::from_be_bytes(mci_bytes);
            if mci < from_mci || mci > to_mci {
                continue;
            }
            let mut row: CommissionOutputRow = bin_dec(&bytes)?;
            if row.is_spent {
                continue;
            }
            total += row.amount;
            row.is_spent = true;
            updates.push((key.to_vec(), bin_enc(&row)?));
        }
        for (key, value) in updates {
            tree.insert(key, value).map_err(storage_err)?;
        }
        Ok(total)
    }

    /// Unspent commission total without consuming it (validation view).
    pub fn commission_range_total(
        &self,
        witnessing: bool,
        address: &Address,
        from_mci: Mci,
        to_mci: Mci,
    ) -> Result<Amount, BraidError> {
        let tree = if witnessing {
            &self.witnessing_outputs
        } else {
            &self.hc_outputs
        };
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        let mut total = 0u64;
        for item in tree.scan_prefix(&prefix) {
            let (key, bytes) = item.map_err(storage_err)?;
            let mci_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| BraidError::Internal("bad commission key".into()))?;
            let mci = Mci::from_be_bytes(mci_bytes);
            if mci < from_mci || mci > to_mci {
                continue;
            }
            let row: CommissionOutputRow = bin_dec(&bytes)?;
            if !row.is_spent {
                total += row.amount;
            }
        }
        Ok(total)
    }

    // ── TPS fee balances ─────────────────────────────────────────────────────

    pub fn tps_fee_balance(&self, address: &Address) -> Result<i64, BraidError> {
        match self
            .tps_fee_balances
            .get(address.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| BraidError::Internal("bad tps balance".into()))?;
                Ok(i64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    pub fn add_tps_fee_balance(&self, address: &Address, delta: i64) -> Result<i64, BraidError> {
        let new_balance = self.tps_fee_balance(address)? + delta;
        self.tps_fee_balances
            .insert(address.as_bytes(), &new_balance.to_be_bytes())
            .map_err(storage_err)?;
        Ok(new_balance)
    }

    // ── Witness lists ────────────────────────────────────────────────────────

    pub fn put_witness_list(&self, unit: &UnitHash, list: &[Address]) -> Result<(), BraidError> {
        self.witness_lists
            .insert(unit.as_bytes(), bin_enc(&list.to_vec())?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn witness_list(&self, unit: &UnitHash) -> Result<Option<Vec<Address>>, BraidError> {
        match self
            .witness_lists
            .get(unit.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bin_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Author & attestation indexes ─────────────────────────────────────────

    pub fn index_author_unit(&self, address: &Address, unit: &UnitHash) -> Result<(), BraidError> {
        self.author_units
            .insert(composite_key(&[address.as_bytes(), unit.as_bytes()]), &[])
            .map_err(storage_err)?;
        Ok(())
    }

    /// Whether `address` has ever authored a unit.
    pub fn address_seen(&self, address: &Address) -> Result<bool, BraidError> {
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        Ok(self.author_units.scan_prefix(&prefix).next().is_some())
    }

    /// Latest MCI at which `address` authored a unit within [from, to],
    /// scanning its authored units.
    pub fn author_active_in_range(
        &self,
        address: &Address,
        from_mci: Mci,
        to_mci: Mci,
    ) -> Result<bool, BraidError> {
        let mut prefix = address.as_bytes().to_vec();
        prefix.push(0);
        for item in self.author_units.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let unit = UnitHash::new(String::from_utf8_lossy(&key[prefix.len()..]).to_string())?;
            if let Some(props) = self.unit_props(&unit)? {
                if let Some(mci) = props.main_chain_index {
                    if props.is_stable && mci >= from_mci && mci <= to_mci {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    pub fn index_attestation(
        &self,
        attestor: &Address,
        attested: &Address,
        unit: &UnitHash,
    ) -> Result<(), BraidError> {
        self.attestations
            .insert(
                composite_key(&[attested.as_bytes(), attestor.as_bytes()]),
                unit.as_bytes(),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Whether any of `attestors` has attested `address`.
    pub fn is_attested_by(
        &self,
        address: &Address,
        attestors: &[Address],
    ) -> Result<bool, BraidError> {
        for attestor in attestors {
            let key = composite_key(&[address.as_bytes(), attestor.as_bytes()]);
            if self.attestations.contains_key(&key).map_err(storage_err)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Main chain index ─────────────────────────────────────────────────────

    pub fn set_mc_unit(&self, mci: Mci, unit: &UnitHash) -> Result<(), BraidError> {
        self.main_chain
            .insert(mci.to_be_bytes().to_vec(), unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn mc_unit_at(&self, mci: Mci) -> Result<Option<UnitHash>, BraidError> {
        match self
            .main_chain
            .get(mci.to_be_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(UnitHash::new(
                String::from_utf8_lossy(&bytes).to_string(),
            )?)),
            None => Ok(None),
        }
    }

    /// Highest MCI currently assigned on the (possibly provisional) main
    /// chain.
    pub fn mc_top(&self) -> Result<Option<(Mci, UnitHash)>, BraidError> {
        match self.main_chain.last().map_err(storage_err)? {
            Some((key, value)) => {
                let arr: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| BraidError::Internal("bad main_chain key".into()))?;
                Ok(Some((
                    Mci::from_be_bytes(arr),
                    UnitHash::new(String::from_utf8_lossy(&value).to_string())?,
                )))
            }
            None => Ok(None),
        }
    }

    /// Snapshot of all unstable unit props. The unstable cache is complete
    /// by construction (warmed at open, appended on every write).
    pub fn unstable_units_snapshot(&self) -> Result<Vec<UnitProps>, BraidError> {
        Ok(self.caches_read()?.unstable_units.values().cloned().collect())
    }

    pub fn clear_mc_above(&self, mci: Mci) -> Result<(), BraidError> {
        let mut to_remove = Vec::new();
        for item in self.main_chain.range(((mci + 1).to_be_bytes().to_vec())..) {
            let (key, _) = item.map_err(storage_err)?;
            to_remove.push(key);
        }
        for key in to_remove {
            self.main_chain.remove(key).map_err(storage_err)?;
        }
        Ok(())
    }

    // ── Unhandled joints & dependencies ──────────────────────────────────────

    pub fn park_joint(&self, row: &UnhandledJoint) -> Result<(), BraidError> {
        let unit = row.joint.unit_hash();
        self.unhandled_joints
            .insert(unit.as_bytes(), json_enc(row)?)
            .map_err(storage_err)?;
        for dep in &row.missing_units {
            self.dependencies
                .insert(composite_key(&[dep.as_bytes(), unit.as_bytes()]), &[])
                .map_err(storage_err)?;
        }
        debug!(unit = %unit, missing = row.missing_units.len(), "joint parked");
        Ok(())
    }

    pub fn unhandled_joint(&self, unit: &UnitHash) -> Result<Option<UnhandledJoint>, BraidError> {
        match self
            .unhandled_joints
            .get(unit.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(json_dec(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_unhandled(&self, unit: &UnitHash) -> Result<(), BraidError> {
        if let Some(row) = self.unhandled_joint(unit)? {
            for dep in &row.missing_units {
                self.dependencies
                    .remove(composite_key(&[dep.as_bytes(), unit.as_bytes()]))
                    .map_err(storage_err)?;
            }
        }
        self.unhandled_joints
            .remove(unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Parked joints waiting on `dep`, now that it has been saved.
    pub fn joints_waiting_on(&self, dep: &UnitHash) -> Result<Vec<UnhandledJoint>, BraidError> {
        let mut prefix = dep.as_bytes().to_vec();
        prefix.push(0);
        let mut result = Vec::new();
        for item in self.dependencies.scan_prefix(&prefix) {
            let (key, _) = item.map_err(storage_err)?;
            let waiting =
                UnitHash::new(String::from_utf8_lossy(&key[prefix.len()..]).to_string())?;
            if let Some(row) = self.unhandled_joint(&waiting)? {
                result.push(row);
            }
        }
        Ok(result)
    }

    // ── Archival ─────────────────────────────────────────────────────────────

    /// Whether the unit was ever archived. Deliberately reason-blind: any
    /// archival suppresses re-acceptance.
    pub fn is_archived(&self, unit: &UnitHash) -> bool {
        self.archived_joints
            .contains_key(unit.as_bytes())
            .unwrap_or(false)
    }

    /// Remove-mode archival for uncovered nonserial units: every row goes.
    pub fn archive_remove(&self, unit: &UnitHash) -> Result<(), BraidError> {
        self.archived_joints
            .insert(unit.as_bytes(), json_enc(&ArchivalReason::Uncovered)?)
            .map_err(storage_err)?;
        self.joints
            .remove(Self::joint_key(unit))
            .map_err(storage_err)?;
        self.units.remove(unit.as_bytes()).map_err(storage_err)?;
        let mut out_prefix = unit.as_bytes().to_vec();
        out_prefix.push(0);
        let mut to_remove = Vec::new();
        for item in self.outputs.scan_prefix(&out_prefix) {
            let (key, _) = item.map_err(storage_err)?;
            to_remove.push(key);
        }
        for key in to_remove {
            self.outputs.remove(key).map_err(storage_err)?;
        }
        let mut caches = self.caches_write()?;
        caches.unstable_units.remove(unit);
        caches.unstable_messages.remove(unit);
        info!(unit = %unit, "archived (remove)");
        Ok(())
    }

    /// Void-mode archival for final-bad stable units: payloads are stripped
    /// from the stored joint, the skeleton stays.
    pub fn archive_void(&self, unit: &UnitHash, voided_joint: &Joint) -> Result<(), BraidError> {
        self.archived_joints
            .insert(unit.as_bytes(), json_enc(&ArchivalReason::Voided)?)
            .map_err(storage_err)?;
        self.put_joint(voided_joint)?;
        info!(unit = %unit, "archived (void)");
        Ok(())
    }

    // ── Hash tree & catchup balls ────────────────────────────────────────────

    pub fn put_hash_tree_ball(&self, ball: &Ball, unit: &UnitHash) -> Result<(), BraidError> {
        self.hash_tree_balls
            .insert(ball.as_bytes(), unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn hash_tree_unit(&self, ball: &Ball) -> Result<Option<UnitHash>, BraidError> {
        match self
            .hash_tree_balls
            .get(ball.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(UnitHash::new(
                String::from_utf8_lossy(&bytes).to_string(),
            )?)),
            None => Ok(None),
        }
    }

    pub fn clear_hash_tree(&self) -> Result<(), BraidError> {
        self.hash_tree_balls.clear().map_err(storage_err)?;
        Ok(())
    }

    pub fn push_catchup_ball(&self, seq: u64, ball: &Ball) -> Result<(), BraidError> {
        self.catchup_balls
            .insert(seq.to_be_bytes().to_vec(), ball.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn catchup_balls(&self) -> Result<Vec<Ball>, BraidError> {
        let mut result = Vec::new();
        for item in self.catchup_balls.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            result.push(Ball::new(String::from_utf8_lossy(&bytes).to_string())?);
        }
        Ok(result)
    }

    pub fn pop_front_catchup_ball(&self) -> Result<Option<Ball>, BraidError> {
        match self.catchup_balls.pop_min().map_err(storage_err)? {
            Some((_, bytes)) => Ok(Some(Ball::new(String::from_utf8_lossy(&bytes).to_string())?)),
            None => Ok(None),
        }
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn meta_u64(&self, key: &str) -> Result<Option<u64>, BraidError> {
        match self.meta.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| BraidError::Internal(format!("bad meta value for {key}")))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn put_meta_u64(&self, key: &str, value: u64) -> Result<(), BraidError> {
        self.meta
            .insert(key.as_bytes(), &value.to_be_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn last_stable_mci(&self) -> Result<Mci, BraidError> {
        Ok(self.meta_u64("last_stable_mci")?.unwrap_or(0))
    }

    pub fn set_last_stable_mci(&self, mci: Mci) -> Result<(), BraidError> {
        self.put_meta_u64("last_stable_mci", mci)?;
        self.put_meta_u64(
            "min_retrievable_mci",
            mci.saturating_sub(braid_core::constants::RETRIEVABLE_DEPTH),
        )?;
        self.caches_write()?.advance_window(mci);
        Ok(())
    }

    pub fn min_retrievable_mci(&self) -> Result<Mci, BraidError> {
        Ok(self.meta_u64("min_retrievable_mci")?.unwrap_or(0))
    }

    pub fn max_spendable_mci(&self) -> Result<Option<Mci>, BraidError> {
        self.meta_u64("max_spendable_mci")
    }

    pub fn set_max_spendable_mci(&self, mci: Mci) -> Result<(), BraidError> {
        self.put_meta_u64("max_spendable_mci", mci)
    }

    pub fn genesis_unit(&self) -> Result<Option<UnitHash>, BraidError> {
        match self.meta.get(b"genesis_unit").map_err(storage_err)? {
            Some(bytes) => Ok(Some(UnitHash::new(
                String::from_utf8_lossy(&bytes).to_string(),
            )?)),
            None => Ok(None),
        }
    }

    pub fn set_genesis_unit(&self, unit: &UnitHash) -> Result<(), BraidError> {
        self.meta
            .insert(b"genesis_unit", unit.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u64, BraidError> {
        Ok(self.meta_u64("schema_version")?.unwrap_or(0))
    }

    pub fn set_schema_version(&self, version: u64) -> Result<(), BraidError> {
        self.put_meta_u64("schema_version", version)
    }

    // ── Unstable messages cache feed ─────────────────────────────────────────

    /// Retain the messages validators may need before stabilization.
    pub fn cache_unstable_messages(&self, unit: &UnitHash, messages: &[Message]) -> Result<(), BraidError> {
        let selected: Vec<Message> = messages
            .iter()
            .filter(|m| {
                matches!(
                    m.app,
                    App::DataFeed | App::Definition | App::SystemVote | App::SystemVoteCount
                )
            })
            .cloned()
            .collect();
        if !selected.is_empty() {
            self.caches_write()?
                .unstable_messages
                .insert(unit.clone(), selected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::types::Sequence;

    fn temp_ledger(tag: &str) -> (Ledger, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("braid_db_test_{tag}"));
        let _ = std::fs::remove_dir_all(&dir);
        (Ledger::open(&dir).unwrap(), dir)
    }

    fn unit_hash(tag: char) -> UnitHash {
        UnitHash::new(tag.to_string().repeat(44)).unwrap()
    }

    fn props(tag: char) -> UnitProps {
        UnitProps {
            unit: unit_hash(tag),
            level: 0,
            witnessed_level: 0,
            best_parent_unit: None,
            parent_units: vec![],
            witness_list_unit: None,
            last_ball_unit: None,
            is_on_main_chain: true,
            main_chain_index: None,
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
    fn props_round_trip_with_cache_and_db() {
        let (ledger, dir) = temp_ledger("props");
        let p = props('A');
        ledger.save_unit_props(&p).unwrap();
        assert_eq!(ledger.unit_props(&p.unit).unwrap().unwrap(), p);
        // bypass cache: clear and read from DB
        ledger.caches_write().unwrap().unstable_units.clear();
        assert_eq!(ledger.unit_props(&p.unit).unwrap().unwrap(), p);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn double_spend_claims_are_visible_and_sorted() {
        let (ledger, dir) = temp_ledger("spend");
        let src = unit_hash('A');
        let s1 = unit_hash('C');
        let s2 = unit_hash('B');
        assert!(ledger.add_spend_claim(&None, &src, 0, 0, &s1).unwrap().is_empty());
        let others = ledger.add_spend_claim(&None, &src, 0, 0, &s2).unwrap();
        assert_eq!(others, vec![s1.clone()]);
        // claimants come back hash-sorted regardless of arrival order
        let all = ledger.spend_claimants(&None, &src, 0, 0).unwrap();
        assert_eq!(all, vec![s2, s1]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn archived_detection_ignores_reason() {
        let (ledger, dir) = temp_ledger("arch");
        let u1 = unit_hash('D');
        ledger.archive_remove(&u1).unwrap();
        assert!(ledger.is_archived(&u1));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn definition_chash_falls_back_to_address() {
        let (ledger, dir) = temp_ledger("defs");
        let addr = Address::new("E".repeat(32)).unwrap();
        assert_eq!(ledger.definition_chash_at(&addr, 100).unwrap(), addr);
        let chash = Address::new("F".repeat(32)).unwrap();
        ledger.record_definition_change(&addr, &chash, 50).unwrap();
        assert_eq!(ledger.definition_chash_at(&addr, 100).unwrap(), chash);
        // change not yet visible at earlier mci
        assert_eq!(ledger.definition_chash_at(&addr, 49).unwrap(), addr);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unspent_outputs_by_address() {
        let (ledger, dir) = temp_ledger("outs");
        let addr = Address::new("G".repeat(32)).unwrap();
        let u = unit_hash('H');
        let row = OutputRow {
            address: addr.clone(),
            asset: None,
            amount: 500,
            is_spent: false,
            main_chain_index: None,
        };
        ledger.put_output(&u, 0, 0, &row).unwrap();
        let outs = ledger.unspent_outputs(&addr, &None).unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].3.amount, 500);
        ledger.mark_output_spent(&u, 0, 0).unwrap();
        assert!(ledger.unspent_outputs(&addr, &None).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
