use std::collections::BTreeMap;

use braid_core::constants::FULL_TRANSFER_INPUT_SIZE;
use braid_core::error::BraidError;
use braid_core::types::Address;
use braid_storage::Ledger;

/// State mutations accumulated over one primary trigger (and its secondary
/// triggers), committed atomically at the end or dropped entirely on
/// bounce. Reads go through the overlay so later messages observe earlier
/// writes within the same trigger.
#[derive(Debug, Default)]
pub struct StagedAaState {
    /// (aa, var) → Some(new value) | None for deletion.
    vars: BTreeMap<(Address, String), Option<serde_json::Value>>,
    /// (aa, asset tag) → signed balance delta.
    balances: BTreeMap<(Address, String), i128>,
    /// aa → signed storage-size delta in bytes.
    storage_deltas: BTreeMap<Address, i64>,
}

fn var_size(name: &str, value: &serde_json::Value) -> Result<i64, BraidError> {
    let serialized =
        serde_json::to_string(value).map_err(|e| BraidError::Serialization(e.to_string()))?;
    Ok((name.len() + serialized.len()) as i64)
}

impl StagedAaState {
    /// Read-through: staged overlay first, then the persistent store.
    pub fn var(
        &self,
        ledger: &Ledger,
        aa: &Address,
        name: &str,
    ) -> Result<Option<serde_json::Value>, BraidError> {
        if let Some(staged) = self.vars.get(&(aa.clone(), name.to_string())) {
            return Ok(staged.clone());
        }
        ledger.aa_state_var(aa, name)
    }

    pub fn set_var(
        &mut self,
        ledger: &Ledger,
        aa: &Address,
        name: &str,
        value: Option<serde_json::Value>,
    ) -> Result<(), BraidError> {
        let old = self.var(ledger, aa, name)?;
        let old_size = match &old {
            Some(v) => var_size(name, v)?,
            None => 0,
        };
        let new_size = match &value {
            Some(v) => var_size(name, v)?,
            None => 0,
        };
        *self.storage_deltas.entry(aa.clone()).or_insert(0) += new_size - old_size;
        self.vars.insert((aa.clone(), name.to_string()), value);
        Ok(())
    }

    pub fn balance(&self, ledger: &Ledger, aa: &Address, asset: &str) -> Result<u64, BraidError> {
        let stored = ledger.aa_balance(aa, asset)? as i128;
        let delta = self
            .balances
            .get(&(aa.clone(), asset.to_string()))
            .copied()
            .unwrap_or(0);
        let total = stored + delta;
        if total < 0 {
            return Err(BraidError::Internal(format!(
                "negative staged balance for {aa} in {asset}"
            )));
        }
        Ok(total as u64)
    }

    pub fn add_balance(&mut self, aa: &Address, asset: &str, delta: i128) {
        *self
            .balances
            .entry((aa.clone(), asset.to_string()))
            .or_insert(0) += delta;
    }

    /// Atomic commit of everything staged. The storage-size invariant is
    /// checked against the AA's actual post-commit byte balance.
    pub fn commit(self, ledger: &Ledger) -> Result<(), BraidError> {
        // balances first, so the storage check below sees final numbers
        for ((aa, asset), delta) in &self.balances {
            let stored = ledger.aa_balance(aa, asset)? as i128;
            let total = stored + delta;
            if total < 0 {
                return Err(BraidError::Internal(format!(
                    "balance of {aa} in {asset} would go negative"
                )));
            }
            ledger.set_aa_balance(aa, asset, total as u64)?;
        }
        for (aa, delta) in &self.storage_deltas {
            let row = ledger
                .aa(aa)?
                .ok_or_else(|| BraidError::Internal(format!("no AA row for {aa}")))?;
            let new_size = (row.storage_size as i64 + delta).max(0) as u64;
            if new_size > FULL_TRANSFER_INPUT_SIZE {
                let byte_balance = ledger.aa_balance(aa, "base")?;
                if new_size > byte_balance {
                    return Err(BraidError::UnitError(format!(
                        "storage size {new_size} exceeds byte balance {byte_balance} of {aa}"
                    )));
                }
            }
            let mut updated = row;
            updated.storage_size = new_size;
            ledger.put_aa(&updated)?;
        }
        for ((aa, name), value) in &self.vars {
            ledger.set_aa_state_var(aa, name, value.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger(tag: &str) -> (Ledger, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("braid_aa_state_test_{tag}"));
        let _ = std::fs::remove_dir_all(&dir);
        (Ledger::open(&dir).unwrap(), dir)
    }

    fn aa_addr() -> Address {
        Address::new("A".repeat(32)).unwrap()
    }

    #[test]
    fn staged_reads_see_staged_writes() {
        let (ledger, dir) = temp_ledger("overlay");
        let aa = aa_addr();
        let mut staged = StagedAaState::default();
        staged
            .set_var(&ledger, &aa, "count", Some(serde_json::json!(1)))
            .unwrap();
        assert_eq!(
            staged.var(&ledger, &aa, "count").unwrap(),
            Some(serde_json::json!(1))
        );
        // not yet visible in storage
        assert_eq!(ledger.aa_state_var(&aa, "count").unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dropped_stage_leaves_storage_untouched() {
        let (ledger, dir) = temp_ledger("drop");
        let aa = aa_addr();
        {
            let mut staged = StagedAaState::default();
            staged
                .set_var(&ledger, &aa, "x", Some(serde_json::json!("v")))
                .unwrap();
            // dropped without commit — the bounce path
        }
        assert_eq!(ledger.aa_state_var(&aa, "x").unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
