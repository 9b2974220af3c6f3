use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::aa::AaDefinition;
use crate::constants::{MAX_COMPLEXITY, MAX_DEPTH, MAX_OPS};
use crate::error::BraidError;
use crate::types::{Address, Mci, Timestamp, UnitHash};
use crate::unit::DataFeedValue;

// ── Relation ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Eq => "=",
            Relation::Ne => "!=",
            Relation::Gt => ">",
            Relation::Gte => ">=",
            Relation::Lt => "<",
            Relation::Lte => "<=",
        };
        write!(f, "{s}")
    }
}

// ── Operator payloads ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigArg {
    pub pubkey: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HashArg {
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ROfSetArg {
    pub required: usize,
    pub set: Vec<Definition>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedEntry {
    pub weight: u32,
    pub value: Definition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedArg {
    pub required: u32,
    pub set: Vec<WeightedEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InDataFeedArg {
    pub oracles: Vec<Address>,
    pub feed_name: String,
    pub relation: Relation,
    pub value: DataFeedValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InMerkleArg {
    pub oracles: Vec<Address>,
    pub feed_name: String,
    pub element: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundArg {
    pub relation: Relation,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttestedArg {
    pub address: Address,
    pub attestors: Vec<Address>,
}

// ── Definition ───────────────────────────────────────────────────────────────

/// An address definition: a capability tree over signatures, hash locks,
/// set combinators and chain predicates. Wire form is `["op", arg]` JSON
/// arrays; `Address = chash160(definition)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Definition {
    Sig(SigArg),
    Hash(HashArg),
    And(Vec<Definition>),
    Or(Vec<Definition>),
    ROfSet(ROfSetArg),
    Weighted(WeightedArg),
    /// Delegate to another address's current definition.
    Address(Address),
    CosignedBy(Address),
    Not(Box<Definition>),
    InDataFeed(InDataFeedArg),
    InMerkle(InMerkleArg),
    Mci(BoundArg),
    Timestamp(BoundArg),
    /// Minimum age, in seconds, of every output this unit spends.
    Age(BoundArg),
    Attested(AttestedArg),
    Seen(UnitHash),
    SeenAddress(Address),
    HasDefinitionChange { address: Address, new_chash: Address },
    AutonomousAgent(Box<AaDefinition>),
}

impl Definition {
    pub fn op(&self) -> &'static str {
        match self {
            Definition::Sig(_) => "sig",
            Definition::Hash(_) => "hash",
            Definition::And(_) => "and",
            Definition::Or(_) => "or",
            Definition::ROfSet(_) => "r of set",
            Definition::Weighted(_) => "weighted and",
            Definition::Address(_) => "address",
            Definition::CosignedBy(_) => "cosigned by",
            Definition::Not(_) => "not",
            Definition::InDataFeed(_) => "in data feed",
            Definition::InMerkle(_) => "in merkle",
            Definition::Mci(_) => "mci",
            Definition::Timestamp(_) => "timestamp",
            Definition::Age(_) => "age",
            Definition::Attested(_) => "attested",
            Definition::Seen(_) => "seen",
            Definition::SeenAddress(_) => "seen address",
            Definition::HasDefinitionChange { .. } => "has definition change",
            Definition::AutonomousAgent(_) => "autonomous agent",
        }
    }

    // ── Wire form ────────────────────────────────────────────────────────────

    pub fn to_value(&self) -> Result<serde_json::Value, BraidError> {
        let err = |e: serde_json::Error| BraidError::Serialization(e.to_string());
        let arg = match self {
            Definition::Sig(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Hash(a) => serde_json::to_value(a).map_err(err)?,
            Definition::And(subs) | Definition::Or(subs) => {
                let vals: Result<Vec<_>, _> = subs.iter().map(|d| d.to_value()).collect();
                serde_json::Value::Array(vals?)
            }
            Definition::ROfSet(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Weighted(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Address(a) => serde_json::to_value(a).map_err(err)?,
            Definition::CosignedBy(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Not(sub) => sub.to_value()?,
            Definition::InDataFeed(a) => serde_json::to_value(a).map_err(err)?,
            Definition::InMerkle(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Mci(a) | Definition::Timestamp(a) | Definition::Age(a) => {
                serde_json::to_value(a).map_err(err)?
            }
            Definition::Attested(a) => serde_json::to_value(a).map_err(err)?,
            Definition::Seen(u) => serde_json::to_value(u).map_err(err)?,
            Definition::SeenAddress(a) => serde_json::to_value(a).map_err(err)?,
            Definition::HasDefinitionChange { address, new_chash } => serde_json::json!([
                address, new_chash
            ]),
            Definition::AutonomousAgent(aa) => serde_json::to_value(aa.as_ref()).map_err(err)?,
        };
        Ok(serde_json::json!([self.op(), arg]))
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, BraidError> {
        Self::from_value_at_depth(value, 0)
    }

    fn from_value_at_depth(value: &serde_json::Value, depth: usize) -> Result<Self, BraidError> {
        if depth > MAX_DEPTH {
            return Err(BraidError::DepthExceeded {
                got: depth,
                max: MAX_DEPTH,
            });
        }
        let arr = value
            .as_array()
            .ok_or_else(|| BraidError::Definition("definition must be [op, arg]".into()))?;
        if arr.len() != 2 {
            return Err(BraidError::Definition(format!(
                "definition must have 2 elements, got {}",
                arr.len()
            )));
        }
        let op = arr[0]
            .as_str()
            .ok_or_else(|| BraidError::Definition("definition op must be a string".into()))?;
        let arg = &arr[1];
        let parse_err =
            |e: serde_json::Error| BraidError::Definition(format!("bad arg for op {op}: {e}"));
        let def = match op {
            "sig" => Definition::Sig(serde_json::from_value(arg.clone()).map_err(parse_err)?),
            "hash" => Definition::Hash(serde_json::from_value(arg.clone()).map_err(parse_err)?),
            "and" | "or" => {
                let subs = arg
                    .as_array()
                    .ok_or_else(|| BraidError::Definition(format!("{op} arg must be array")))?
                    .iter()
                    .map(|v| Self::from_value_at_depth(v, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                if op == "and" {
                    Definition::And(subs)
                } else {
                    Definition::Or(subs)
                }
            }
            "r of set" => {
                let obj = arg
                    .as_object()
                    .ok_or_else(|| BraidError::Definition("r of set arg must be object".into()))?;
                let required = obj
                    .get("required")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| BraidError::Definition("r of set needs required".into()))?
                    as usize;
                let set = obj
                    .get("set")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| BraidError::Definition("r of set needs set".into()))?
                    .iter()
                    .map(|v| Self::from_value_at_depth(v, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Definition::ROfSet(ROfSetArg { required, set })
            }
            "weighted and" => {
                let obj = arg.as_object().ok_or_else(|| {
                    BraidError::Definition("weighted and arg must be object".into())
                })?;
                let required = obj
                    .get("required")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| BraidError::Definition("weighted and needs required".into()))?
                    as u32;
                let set = obj
                    .get("set")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| BraidError::Definition("weighted and needs set".into()))?
                    .iter()
                    .map(|v| {
                        let entry = v.as_object().ok_or_else(|| {
                            BraidError::Definition("weighted entry must be object".into())
                        })?;
                        let weight = entry
                            .get("weight")
                            .and_then(|w| w.as_u64())
                            .ok_or_else(|| {
                                BraidError::Definition("weighted entry needs weight".into())
                            })? as u32;
                        let value = entry.get("value").ok_or_else(|| {
                            BraidError::Definition("weighted entry needs value".into())
                        })?;
                        Ok(WeightedEntry {
                            weight,
                            value: Self::from_value_at_depth(value, depth + 1)?,
                        })
                    })
                    .collect::<Result<Vec<_>, BraidError>>()?;
                Definition::Weighted(WeightedArg { required, set })
            }
            "address" => {
                Definition::Address(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "cosigned by" => {
                Definition::CosignedBy(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "not" => Definition::Not(Box::new(Self::from_value_at_depth(arg, depth + 1)?)),
            "in data feed" => {
                Definition::InDataFeed(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "in merkle" => {
                Definition::InMerkle(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "mci" => Definition::Mci(serde_json::from_value(arg.clone()).map_err(parse_err)?),
            "timestamp" => {
                Definition::Timestamp(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "age" => Definition::Age(serde_json::from_value(arg.clone()).map_err(parse_err)?),
            "attested" => {
                Definition::Attested(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "seen" => Definition::Seen(serde_json::from_value(arg.clone()).map_err(parse_err)?),
            "seen address" => {
                Definition::SeenAddress(serde_json::from_value(arg.clone()).map_err(parse_err)?)
            }
            "has definition change" => {
                let pair: (Address, Address) =
                    serde_json::from_value(arg.clone()).map_err(parse_err)?;
                Definition::HasDefinitionChange {
                    address: pair.0,
                    new_chash: pair.1,
                }
            }
            "autonomous agent" => Definition::AutonomousAgent(Box::new(
                serde_json::from_value(arg.clone()).map_err(parse_err)?,
            )),
            other => {
                return Err(BraidError::Definition(format!("unknown op: {other}")));
            }
        };
        Ok(def)
    }
}

impl Serialize for Definition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value()
            .map_err(|e| S::Error::custom(e.to_string()))?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Definition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Definition::from_value(&value).map_err(|e| D::Error::custom(e.to_string()))
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

/// Running complexity/op budget, threaded through every branch — including
/// branches the presented authentifiers never exercise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub complexity: u32,
    pub ops: u32,
}

impl Counters {
    fn charge(&mut self, complexity: u32) -> Result<(), BraidError> {
        self.ops += 1;
        self.complexity += complexity;
        if self.complexity > MAX_COMPLEXITY {
            return Err(BraidError::ComplexityExceeded {
                got: self.complexity,
                max: MAX_COMPLEXITY,
            });
        }
        if self.ops > MAX_OPS {
            return Err(BraidError::OpsExceeded {
                got: self.ops,
                max: MAX_OPS,
            });
        }
        Ok(())
    }
}

/// Resolves an address to the definition active at the validation MCI.
pub trait DefinitionResolver {
    fn resolve(&self, address: &Address) -> Result<Option<Definition>, BraidError>;
}

impl Definition {
    /// Structural validation with full complexity accounting. Nested
    /// `address` operators are resolved and validated too: a redefined
    /// nested address may push the total over budget even when the
    /// authentifier path never touches it.
    pub fn validate(
        &self,
        resolver: &dyn DefinitionResolver,
        counters: &mut Counters,
        depth: usize,
    ) -> Result<(), BraidError> {
        if depth > MAX_DEPTH {
            return Err(BraidError::DepthExceeded {
                got: depth,
                max: MAX_DEPTH,
            });
        }
        match self {
            Definition::Sig(arg) => {
                counters.charge(1)?;
                if arg.pubkey.len() != crate::constants::PUBKEY_LENGTH {
                    return Err(BraidError::Definition(format!(
                        "bad pubkey length {}",
                        arg.pubkey.len()
                    )));
                }
                Ok(())
            }
            Definition::Hash(arg) => {
                counters.charge(1)?;
                if arg.hash.len() != crate::constants::HASH_LENGTH {
                    return Err(BraidError::Definition("bad hash length".into()));
                }
                Ok(())
            }
            Definition::And(subs) | Definition::Or(subs) => {
                counters.charge(0)?;
                if subs.len() < 2 {
                    return Err(BraidError::Definition(format!(
                        "{} needs at least 2 subdefinitions",
                        self.op()
                    )));
                }
                for sub in subs {
                    sub.validate(resolver, counters, depth + 1)?;
                }
                Ok(())
            }
            Definition::ROfSet(arg) => {
                counters.charge(0)?;
                if arg.required == 0 || arg.required > arg.set.len() {
                    return Err(BraidError::Definition(format!(
                        "r of set: required {} of {}",
                        arg.required,
                        arg.set.len()
                    )));
                }
                for sub in &arg.set {
                    sub.validate(resolver, counters, depth + 1)?;
                }
                Ok(())
            }
            Definition::Weighted(arg) => {
                counters.charge(0)?;
                let total: u32 = arg.set.iter().map(|e| e.weight).sum();
                if arg.required == 0 || arg.required > total {
                    return Err(BraidError::Definition(format!(
                        "weighted and: required {} of total weight {total}",
                        arg.required
                    )));
                }
                for entry in &arg.set {
                    if entry.weight == 0 {
                        return Err(BraidError::Definition("zero weight".into()));
                    }
                    entry.value.validate(resolver, counters, depth + 1)?;
                }
                Ok(())
            }
            Definition::Address(addr) => {
                counters.charge(1)?;
                let inner = resolver.resolve(addr)?.ok_or_else(|| {
                    BraidError::Definition(format!("definition of {addr} not found"))
                })?;
                inner.validate(resolver, counters, depth + 1)
            }
            Definition::CosignedBy(_) => counters.charge(1),
            Definition::Not(sub) => {
                counters.charge(0)?;
                match sub.as_ref() {
                    // Negating an authentication leaf makes no sense: absence
                    // of a signature is not provable.
                    Definition::Sig(_) | Definition::Hash(_) | Definition::Address(_) => {
                        Err(BraidError::Definition(format!(
                            "not over {} is not allowed",
                            sub.op()
                        )))
                    }
                    _ => sub.validate(resolver, counters, depth + 1),
                }
            }
            Definition::InDataFeed(arg) => {
                counters.charge(1)?;
                if arg.oracles.is_empty() {
                    return Err(BraidError::Definition("in data feed needs oracles".into()));
                }
                if arg.feed_name.is_empty() || arg.feed_name.len() > 64 {
                    return Err(BraidError::Definition("bad feed name".into()));
                }
                Ok(())
            }
            Definition::InMerkle(arg) => {
                counters.charge(1)?;
                if arg.oracles.is_empty() {
                    return Err(BraidError::Definition("in merkle needs oracles".into()));
                }
                Ok(())
            }
            Definition::Mci(_) | Definition::Timestamp(_) | Definition::Age(_) => {
                counters.charge(0)
            }
            Definition::Attested(arg) => {
                counters.charge(1)?;
                if arg.attestors.is_empty() {
                    return Err(BraidError::Definition("attested needs attestors".into()));
                }
                Ok(())
            }
            Definition::Seen(_) | Definition::SeenAddress(_)
            | Definition::HasDefinitionChange { .. } => counters.charge(1),
            Definition::AutonomousAgent(aa) => {
                counters.charge(1)?;
                aa.validate(depth + 1)
            }
        }
    }

    /// True if the tree can ever evaluate to true via a signature — a
    /// definition with no signing path cannot author units.
    pub fn has_sig_path(&self) -> bool {
        match self {
            Definition::Sig(_) | Definition::Address(_) => true,
            Definition::Hash(_) => true,
            Definition::And(subs) | Definition::Or(subs) => subs.iter().any(|d| d.has_sig_path()),
            Definition::ROfSet(arg) => arg.set.iter().any(|d| d.has_sig_path()),
            Definition::Weighted(arg) => arg.set.iter().any(|e| e.value.has_sig_path()),
            Definition::Not(_) => false,
            Definition::AutonomousAgent(_) => false,
            _ => false,
        }
    }
}

// ── Evaluation ───────────────────────────────────────────────────────────────

/// Everything the bottom-up interpreter needs from the outside world. The
/// storage-backed implementation lives in braid-validation; tests use mocks.
pub trait EvalContext: DefinitionResolver {
    /// Verify the authentifier at `path` as an ed25519 signature over the
    /// unit's signing hash with `pubkey`. Absent authentifier → Ok(false).
    fn verify_authentifier(&self, pubkey: &str, path: &str) -> Result<bool, BraidError>;
    /// Check the authentifier at `path` as a hash-lock preimage.
    fn preimage_matches(&self, hash: &str, path: &str) -> Result<bool, BraidError>;
    fn mci(&self) -> Mci;
    fn timestamp(&self) -> Timestamp;
    fn cosigner_present(&self, address: &Address) -> bool;
    fn data_feed_matches(&self, arg: &InDataFeedArg) -> Result<bool, BraidError>;
    fn merkle_contains(&self, arg: &InMerkleArg) -> Result<bool, BraidError>;
    fn is_attested(&self, address: &Address, attestors: &[Address]) -> Result<bool, BraidError>;
    fn seen_unit(&self, unit: &UnitHash) -> Result<bool, BraidError>;
    fn seen_address(&self, address: &Address) -> Result<bool, BraidError>;
    fn has_definition_change(
        &self,
        address: &Address,
        new_chash: &Address,
    ) -> Result<bool, BraidError>;
    /// Age in seconds of the youngest output spent by the unit, if any.
    fn min_input_age(&self) -> Result<Option<i64>, BraidError>;
}

fn bound_holds(relation: Relation, left: i64, right: i64) -> bool {
    match relation {
        Relation::Eq => left == right,
        Relation::Ne => left != right,
        Relation::Gt => left > right,
        Relation::Gte => left >= right,
        Relation::Lt => left < right,
        Relation::Lte => left <= right,
    }
}

impl Definition {
    /// Bottom-up evaluation against the provided authentifiers and chain
    /// state. `path` starts at "r"; set combinators extend it per branch.
    pub fn evaluate(
        &self,
        ctx: &dyn EvalContext,
        path: &str,
        depth: usize,
    ) -> Result<bool, BraidError> {
        if depth > MAX_DEPTH {
            return Err(BraidError::DepthExceeded {
                got: depth,
                max: MAX_DEPTH,
            });
        }
        match self {
            Definition::Sig(arg) => ctx.verify_authentifier(&arg.pubkey, path),
            Definition::Hash(arg) => ctx.preimage_matches(&arg.hash, path),
            Definition::And(subs) => {
                for (i, sub) in subs.iter().enumerate() {
                    if !sub.evaluate(ctx, &format!("{path}.{i}"), depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Definition::Or(subs) => {
                let mut ok = false;
                // All branches run: errors in unexercised branches still
                // surface, and evaluation cost is input-independent.
                for (i, sub) in subs.iter().enumerate() {
                    if sub.evaluate(ctx, &format!("{path}.{i}"), depth + 1)? {
                        ok = true;
                    }
                }
                Ok(ok)
            }
            Definition::ROfSet(arg) => {
                let mut count = 0usize;
                for (i, sub) in arg.set.iter().enumerate() {
                    if sub.evaluate(ctx, &format!("{path}.{i}"), depth + 1)? {
                        count += 1;
                    }
                }
                Ok(count >= arg.required)
            }
            Definition::Weighted(arg) => {
                let mut weight = 0u32;
                for (i, entry) in arg.set.iter().enumerate() {
                    if entry.value.evaluate(ctx, &format!("{path}.{i}"), depth + 1)? {
                        weight += entry.weight;
                    }
                }
                Ok(weight >= arg.required)
            }
            Definition::Address(addr) => {
                let inner = ctx.resolve(addr)?.ok_or_else(|| {
                    BraidError::Definition(format!("definition of {addr} not found"))
                })?;
                inner.evaluate(ctx, path, depth + 1)
            }
            Definition::CosignedBy(addr) => Ok(ctx.cosigner_present(addr)),
            Definition::Not(sub) => Ok(!sub.evaluate(ctx, path, depth + 1)?),
            Definition::InDataFeed(arg) => ctx.data_feed_matches(arg),
            Definition::InMerkle(arg) => ctx.merkle_contains(arg),
            Definition::Mci(arg) => Ok(bound_holds(arg.relation, ctx.mci() as i64, arg.value)),
            Definition::Timestamp(arg) => {
                Ok(bound_holds(arg.relation, ctx.timestamp(), arg.value))
            }
            Definition::Age(arg) => match ctx.min_input_age()? {
                Some(age) => Ok(bound_holds(arg.relation, age, arg.value)),
                None => Ok(false),
            },
            Definition::Attested(arg) => ctx.is_attested(&arg.address, &arg.attestors),
            Definition::Seen(unit) => ctx.seen_unit(unit),
            Definition::SeenAddress(addr) => ctx.seen_address(addr),
            Definition::HasDefinitionChange { address, new_chash } => {
                ctx.has_definition_change(address, new_chash)
            }
            Definition::AutonomousAgent(_) => Err(BraidError::Definition(
                "autonomous agent definitions cannot authenticate".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct MockCtx {
        valid_paths: Vec<&'static str>,
        definitions: BTreeMap<Address, Definition>,
    }

    impl DefinitionResolver for MockCtx {
        fn resolve(&self, address: &Address) -> Result<Option<Definition>, BraidError> {
            Ok(self.definitions.get(address).cloned())
        }
    }

    impl EvalContext for MockCtx {
        fn verify_authentifier(&self, _pubkey: &str, path: &str) -> Result<bool, BraidError> {
            Ok(self.valid_paths.contains(&path))
        }
        fn preimage_matches(&self, _hash: &str, _path: &str) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn mci(&self) -> Mci {
            500
        }
        fn timestamp(&self) -> Timestamp {
            1_700_000_000
        }
        fn cosigner_present(&self, _address: &Address) -> bool {
            false
        }
        fn data_feed_matches(&self, _arg: &InDataFeedArg) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn merkle_contains(&self, _arg: &InMerkleArg) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn is_attested(&self, _a: &Address, _att: &[Address]) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn seen_unit(&self, _unit: &UnitHash) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn seen_address(&self, _address: &Address) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn has_definition_change(
            &self,
            _address: &Address,
            _chash: &Address,
        ) -> Result<bool, BraidError> {
            Ok(false)
        }
        fn min_input_age(&self) -> Result<Option<i64>, BraidError> {
            Ok(None)
        }
    }

    fn addr(c: char) -> Address {
        Address::new(c.to_string().repeat(32)).unwrap()
    }

    fn sig() -> Definition {
        Definition::Sig(SigArg {
            pubkey: "A".repeat(44),
        })
    }

    #[test]
    fn wire_round_trip() {
        let def = Definition::Or(vec![
            sig(),
            Definition::Address(addr('B')),
        ]);
        let v = def.to_value().unwrap();
        assert_eq!(v[0], "or");
        let back = Definition::from_value(&v).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn or_evaluates_all_branches_and_accepts_one() {
        let ctx = MockCtx {
            valid_paths: vec!["r.0"],
            definitions: BTreeMap::new(),
        };
        let def = Definition::Or(vec![sig(), sig()]);
        assert!(def.evaluate(&ctx, "r", 0).unwrap());
    }

    #[test]
    fn nested_address_counts_toward_complexity_even_when_unexercised() {
        // B's definition is a wide r-of-set pushing complexity over budget.
        let mut definitions = BTreeMap::new();
        let wide = Definition::ROfSet(ROfSetArg {
            required: 1,
            set: (0..=MAX_COMPLEXITY).map(|_| sig()).collect(),
        });
        definitions.insert(addr('B'), wide);
        let ctx = MockCtx {
            valid_paths: vec!["r.0"],
            definitions,
        };
        let def = Definition::Or(vec![sig(), Definition::Address(addr('B'))]);
        let mut counters = Counters::default();
        let err = def.validate(&ctx, &mut counters, 0).unwrap_err();
        assert!(matches!(err, BraidError::ComplexityExceeded { .. }));
    }

    #[test]
    fn unknown_op_rejected() {
        let v = serde_json::json!(["teleport", {}]);
        assert!(Definition::from_value(&v).is_err());
    }

    #[test]
    fn mci_bound() {
        let ctx = MockCtx {
            valid_paths: vec![],
            definitions: BTreeMap::new(),
        };
        let def = Definition::Mci(BoundArg {
            relation: Relation::Gte,
            value: 400,
        });
        assert!(def.evaluate(&ctx, "r", 0).unwrap());
        let def = Definition::Mci(BoundArg {
            relation: Relation::Gte,
            value: 501,
        });
        assert!(!def.evaluate(&ctx, "r", 0).unwrap());
    }
}
