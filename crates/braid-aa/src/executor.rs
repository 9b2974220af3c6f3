use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};

use braid_core::constants::{
    ALT, DEFAULT_BOUNCE_FEE, MAX_RESPONSES_PER_PRIMARY_TRIGGER, VERSION,
};
use braid_core::error::{BraidError, ErrorKind};
use braid_core::joint::Joint;
use braid_core::types::{Address, Amount, UnitHash};
use braid_core::unit::{
    App, Author, Input, Message, Output, Payload, PaymentPayload, PayloadLocation, StateUpdate,
    Unit,
};
use braid_crypto::canonical::serialize_for_version;
use braid_storage::rows::{AaResponseRow, TriggerRow};
use braid_storage::Ledger;

use crate::expr::{eval, eval_bool, ExprScope};
use crate::state::StagedAaState;

/// A deterministically generated response unit, ready for the writer to
/// persist inside the same critical section.
pub type ResponseJoint = Joint;

/// One output location a planned response consumes.
type SpendRef = (Option<UnitHash>, UnitHash, u32, u32);

/// Execute stabilized triggers in their deterministic order. Runs under
/// the caller's write lock (`under_write_lock` discipline: no lock is
/// acquired here). Returns the response joints in generation order; state
/// and balances are already committed.
pub fn execute_triggers(
    ledger: &Ledger,
    triggers: &[TriggerRow],
) -> Result<Vec<ResponseJoint>, BraidError> {
    let mut all_responses = Vec::new();
    for trigger in triggers {
        let responses = execute_primary(ledger, trigger)?;
        all_responses.extend(responses);
    }
    Ok(all_responses)
}

fn response_cap(ledger: &Ledger, trigger: &TriggerRow) -> Result<usize, BraidError> {
    let declared = ledger
        .joint(&trigger.unit)?
        .and_then(|j| j.unit.max_aa_responses)
        .map(|n| n as usize);
    Ok(declared
        .unwrap_or(MAX_RESPONSES_PER_PRIMARY_TRIGGER)
        .min(MAX_RESPONSES_PER_PRIMARY_TRIGGER))
}

/// Run one primary trigger and its secondary chain. State-var writes and
/// balance deltas accumulate in one staged set: either the whole chain
/// commits, or everything is dropped and the trigger bounces.
fn execute_primary(
    ledger: &Ledger,
    trigger: &TriggerRow,
) -> Result<Vec<ResponseJoint>, BraidError> {
    let cap = response_cap(ledger, trigger)?;
    let mut staged = StagedAaState::default();
    // each planned spend is attributed to the response unit consuming it
    let mut planned: Vec<(SpendRef, UnitHash)> = Vec::new();
    let mut joints: Vec<Joint> = Vec::new();
    let mut queue: VecDeque<TriggerRow> = VecDeque::from([trigger.clone()]);

    let outcome = loop {
        let Some(current) = queue.pop_front() else {
            break Ok(());
        };
        if joints.len() >= cap {
            break Err(BraidError::UnitError(format!(
                "response cap {cap} exhausted"
            )));
        }
        let refs: Vec<SpendRef> = planned.iter().map(|(r, _)| r.clone()).collect();
        match execute_one(ledger, &current, &mut staged, &refs) {
            Ok(Some((joint, spends))) => {
                for reference in spends {
                    planned.push((reference, joint.unit_hash().clone()));
                }
                for secondary in secondary_triggers(ledger, &joint, &current)? {
                    queue.push_back(secondary);
                }
                joints.push(joint);
            }
            Ok(None) => {}
            Err(e) if e.kind() == ErrorKind::UnitError => break Err(e),
            Err(e) => return Err(e),
        }
    };

    match outcome {
        Ok(()) => {
            staged.commit(ledger)?;
            for ((asset, src, msg, out), spender) in &planned {
                ledger.add_spend_claim(asset, src, *msg, *out, spender)?;
                ledger.mark_output_spent(src, *msg, *out)?;
            }
            for (seq, joint) in joints.iter().enumerate() {
                ledger.put_aa_response(
                    seq as u32,
                    &AaResponseRow {
                        trigger_unit: trigger.unit.clone(),
                        aa_address: trigger.aa_address.clone(),
                        main_chain_index: trigger.main_chain_index,
                        bounced: false,
                        response_unit: Some(joint.unit_hash().clone()),
                        error: None,
                    },
                )?;
            }
            info!(
                trigger = %trigger.unit,
                aa = %trigger.aa_address,
                responses = joints.len(),
                "trigger executed"
            );
            Ok(joints)
        }
        Err(error) => bounce(ledger, trigger, error),
    }
}

/// Execute one (primary or secondary) trigger against its AA. Returns the
/// response joint and the output locations it consumes, or None when no
/// message produced anything.
fn execute_one(
    ledger: &Ledger,
    trigger: &TriggerRow,
    staged: &mut StagedAaState,
    already_planned: &[SpendRef],
) -> Result<Option<(Joint, Vec<SpendRef>)>, BraidError> {
    // incoming funds are visible to the templates
    for (asset, amount) in &trigger.outputs {
        staged.add_balance(&trigger.aa_address, asset, *amount as i128);
    }

    let row = ledger
        .aa(&trigger.aa_address)?
        .ok_or_else(|| BraidError::Internal(format!("no AA at {}", trigger.aa_address)))?;
    // Parameterized AAs execute their base definition with their params.
    let (definition, params) = match &row.definition.base_aa {
        Some(base) => {
            let base_row = ledger
                .aa(base)?
                .ok_or_else(|| BraidError::Internal(format!("base AA {base} missing")))?;
            (base_row.definition, row.definition.params.clone())
        }
        None => (row.definition.clone(), BTreeMap::new()),
    };

    let mc_unit = ledger
        .mc_unit_at(trigger.main_chain_index)?
        .ok_or_else(|| BraidError::Internal(format!("no MC unit at {}", trigger.main_chain_index)))?;
    let mc_props = ledger.expect_unit_props(&mc_unit)?;
    let last_ball = ledger
        .ball_of(&mc_unit)?
        .ok_or_else(|| BraidError::Internal(format!("no ball for MC unit {mc_unit}")))?;
    let genesis = ledger
        .genesis_unit()?
        .ok_or_else(|| BraidError::Internal("no genesis unit".into()))?;

    // init runs before any message
    let mut state_templates: Vec<serde_json::Value> = Vec::new();
    if let Some(init) = &definition.init {
        state_templates.push(init.clone());
    }

    let mut response_messages: Vec<Message> = Vec::new();
    let mut spend_plan: Vec<SpendRef> = Vec::new();
    let mut all_planned: Vec<SpendRef> = already_planned.to_vec();
    let mut balance_deltas: Vec<(String, i128)> = Vec::new();
    for template in &definition.messages {
        let scope = ExprScope {
            ledger,
            trigger,
            aa_address: &trigger.aa_address,
            params: &params,
            staged,
            mci: trigger.main_chain_index,
            timestamp: mc_props.timestamp,
        };
        if let Some(condition) = &template.condition {
            if !eval_bool(condition, &scope)? {
                continue;
            }
        }
        if template.app == App::State {
            // state runs last, whatever its position in the template list
            state_templates.push(template.payload.clone());
            continue;
        }
        let payload_value = eval(&template.payload, &scope)?;
        if template.app == App::Payment {
            if let Some((message, spends, deltas)) =
                build_payment_message(ledger, trigger, staged, &all_planned, &payload_value)?
            {
                response_messages.push(message);
                all_planned.extend(spends.iter().cloned());
                spend_plan.extend(spends);
                balance_deltas.extend(deltas);
            }
        } else {
            let payload = Payload::from_value(template.app, payload_value)?;
            response_messages.push(make_message(template.app, payload)?);
        }
    }

    // apply state updates through the staged overlay; each evaluation gets
    // a fresh scope so the overlay mutations between templates are visible
    for template in &state_templates {
        let evaluated = {
            let scope = ExprScope {
                ledger,
                trigger,
                aa_address: &trigger.aa_address,
                params: &params,
                staged,
                mci: trigger.main_chain_index,
                timestamp: mc_props.timestamp,
            };
            eval(template, &scope)?
        };
        let updates: Vec<StateUpdate> = serde_json::from_value(evaluated)
            .map_err(|e| BraidError::Definition(format!("bad state template: {e}")))?;
        for update in updates {
            if update.delete {
                staged.set_var(ledger, &trigger.aa_address, &update.var, None)?;
            } else {
                staged.set_var(ledger, &trigger.aa_address, &update.var, update.value)?;
            }
        }
    }

    if response_messages.is_empty() {
        return Ok(None);
    }

    let mut unit = Unit {
        unit: UnitHash::new("A".repeat(44))?, // placeholder until hashed
        version: VERSION.into(),
        alt: ALT.into(),
        parent_units: vec![trigger.unit.clone()],
        last_ball: Some(last_ball),
        last_ball_unit: Some(mc_unit),
        witness_list_unit: Some(genesis),
        witnesses: None,
        authors: vec![Author {
            address: trigger.aa_address.clone(),
            definition: None,
            authentifiers: BTreeMap::new(),
        }],
        messages: response_messages,
        timestamp: mc_props.timestamp,
        headers_commission: 0,
        payload_commission: 0,
        tps_fee: None,
        burn_fee: None,
        oversize_fee: None,
        max_aa_responses: None,
        earned_headers_commission_recipients: None,
        content_hash: None,
    };
    finalize_response_unit(ledger, trigger, staged, &mut unit)?;

    for (asset, delta) in balance_deltas {
        staged.add_balance(&trigger.aa_address, &asset, delta);
    }
    staged.add_balance(
        &trigger.aa_address,
        "base",
        -(unit.total_commission() as i128),
    );
    Ok(Some((Joint::new(unit), spend_plan)))
}

/// Evaluate a payment template into a message: outputs from the template,
/// inputs swept deterministically from the AA's unspent outputs, change
/// back to the AA.
#[allow(clippy::type_complexity)]
fn build_payment_message(
    ledger: &Ledger,
    trigger: &TriggerRow,
    staged: &StagedAaState,
    already_planned: &[SpendRef],
    payload_value: &serde_json::Value,
) -> Result<Option<(Message, Vec<SpendRef>, Vec<(String, i128)>)>, BraidError> {
    let asset: Option<UnitHash> = match payload_value.get("asset") {
        Some(serde_json::Value::String(s)) if s != "base" => Some(UnitHash::new(s.clone())?),
        _ => None,
    };
    let asset_tag = asset
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "base".to_string());

    let raw_outputs = payload_value
        .get("outputs")
        .and_then(|o| o.as_array())
        .ok_or_else(|| BraidError::Definition("payment template without outputs".into()))?;
    let mut outputs: Vec<Output> = Vec::new();
    for raw in raw_outputs {
        let address: Address = serde_json::from_value(
            raw.get("address")
                .cloned()
                .ok_or_else(|| BraidError::Definition("output without address".into()))?,
        )
        .map_err(|e| BraidError::Definition(format!("bad output address: {e}")))?;
        let amount = raw
            .get("amount")
            .and_then(|a| a.as_u64())
            .ok_or_else(|| BraidError::Definition("output without amount".into()))?;
        if amount == 0 {
            continue; // zero outputs are dropped, not an error
        }
        outputs.push(Output { address, amount });
    }
    if outputs.is_empty() {
        return Ok(None);
    }
    let out_total: Amount = outputs.iter().map(|o| o.amount).sum();
    let available = staged.balance(ledger, &trigger.aa_address, &asset_tag)?;
    if out_total > available {
        return Err(BraidError::UnitError(format!(
            "AA {} cannot pay {out_total} {asset_tag}, holds {available}",
            trigger.aa_address
        )));
    }

    // deterministic sweep: every unspent output not already planned
    let mut inputs = Vec::new();
    let mut spends = Vec::new();
    let mut total_in: Amount = 0;
    for (src, msg, out, row) in ledger.unspent_outputs(&trigger.aa_address, &asset)? {
        let reference = (asset.clone(), src.clone(), msg, out);
        if already_planned.contains(&reference) {
            continue;
        }
        total_in += row.amount;
        inputs.push(Input::Transfer {
            unit: src.clone(),
            message_index: msg,
            output_index: out,
        });
        spends.push(reference);
    }
    if total_in < out_total {
        return Err(BraidError::UnitError(format!(
            "AA {} outputs cover only {total_in} of {out_total} {asset_tag}",
            trigger.aa_address
        )));
    }

    let paid_away: i128 = outputs
        .iter()
        .filter(|o| o.address != trigger.aa_address)
        .map(|o| o.amount as i128)
        .sum();
    let payment = PaymentPayload {
        asset,
        inputs,
        outputs,
    };
    let message = make_message(App::Payment, Payload::Payment(payment))?;
    Ok(Some((message, spends, vec![(asset_tag, -paid_away)])))
}

fn make_message(app: App, payload: Payload) -> Result<Message, BraidError> {
    let value = payload.to_value()?;
    let serialized = serialize_for_version(&value, VERSION)?;
    Ok(Message {
        app,
        payload_location: PayloadLocation::Inline,
        payload_hash: braid_crypto::sha256_b64(serialized.as_bytes()),
        payload: Some(payload),
        spend_proofs: None,
    })
}

/// Fill commissions and change, then seal the unit hash. The change output
/// of each payment absorbs the difference so balance conservation holds by
/// construction.
fn finalize_response_unit(
    ledger: &Ledger,
    trigger: &TriggerRow,
    staged: &StagedAaState,
    unit: &mut Unit,
) -> Result<(), BraidError> {
    unit.headers_commission = braid_fees::headers_size(unit)?;
    unit.payload_commission = braid_fees::payload_size(unit)?;
    let commission = unit.total_commission();
    let base_balance = staged.balance(ledger, &trigger.aa_address, "base")?;

    // change per payment message: inputs − named outputs − (base) commission
    let mut commission_due = commission;
    for message in &mut unit.messages {
        let Some(Payload::Payment(payment)) = &mut message.payload else {
            continue;
        };
        let total_in: Amount = {
            let mut sum = 0u64;
            for input in &payment.inputs {
                if let Input::Transfer {
                    unit: src,
                    message_index,
                    output_index,
                } = input
                {
                    let row = ledger
                        .output(src, *message_index, *output_index)?
                        .ok_or_else(|| BraidError::Internal("swept output vanished".into()))?;
                    sum += row.amount;
                }
            }
            sum
        };
        let named: Amount = payment.total_output();
        let fees = if payment.asset.is_none() {
            let f = commission_due;
            commission_due = 0;
            f
        } else {
            0
        };
        let spent = named + fees;
        if total_in < spent {
            return Err(BraidError::UnitError(format!(
                "AA {} cannot cover {spent} with inputs of {total_in}",
                trigger.aa_address
            )));
        }
        let change = total_in - spent;
        if change > 0 {
            payment.outputs.push(Output {
                address: trigger.aa_address.clone(),
                amount: change,
            });
        }
        // wire form keeps outputs address-sorted like any other unit
        payment.outputs.sort_by(|a, b| {
            a.address
                .cmp(&b.address)
                .then(a.amount.cmp(&b.amount))
        });
        // payload changed: recompute its hash
        let value = Payload::Payment(payment.clone()).to_value()?;
        let serialized = serialize_for_version(&value, VERSION)?;
        message.payload_hash = braid_crypto::sha256_b64(serialized.as_bytes());
    }
    if commission_due > 0 && base_balance < commission_due {
        return Err(BraidError::UnitError(format!(
            "AA {} cannot cover commission {commission_due}",
            trigger.aa_address
        )));
    }

    unit.unit = braid_crypto::unit_hash(unit)?;
    Ok(())
}

/// Outputs of a response paying other AAs become secondary triggers,
/// processed breadth-first.
fn secondary_triggers(
    ledger: &Ledger,
    joint: &Joint,
    parent_trigger: &TriggerRow,
) -> Result<Vec<TriggerRow>, BraidError> {
    let mut per_aa: BTreeMap<Address, BTreeMap<String, Amount>> = BTreeMap::new();
    for message in &joint.unit.messages {
        let Some(Payload::Payment(payment)) = &message.payload else {
            continue;
        };
        let asset_tag = payment
            .asset
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "base".to_string());
        for output in &payment.outputs {
            if output.address == parent_trigger.aa_address {
                continue;
            }
            if ledger.is_aa(&output.address) {
                *per_aa
                    .entry(output.address.clone())
                    .or_default()
                    .entry(asset_tag.clone())
                    .or_insert(0) += output.amount;
            }
        }
    }
    let data = joint.unit.messages.iter().find_map(|m| match &m.payload {
        Some(Payload::Data(v)) => Some(v.clone()),
        _ => None,
    });
    Ok(per_aa
        .into_iter()
        .map(|(aa_address, outputs)| TriggerRow {
            unit: joint.unit_hash().clone(),
            aa_address,
            trigger_address: parent_trigger.aa_address.clone(),
            outputs,
            data: data.clone(),
            main_chain_index: parent_trigger.main_chain_index,
        })
        .collect())
}

/// The trigger failed: refund the sender minus bounce fees. State is
/// untouched (the staged set was dropped); only balances move, by exactly
/// the amounts kept and refunded.
fn bounce(
    ledger: &Ledger,
    trigger: &TriggerRow,
    error: BraidError,
) -> Result<Vec<ResponseJoint>, BraidError> {
    warn!(trigger = %trigger.unit, aa = %trigger.aa_address, %error, "trigger bounced");
    let row = ledger
        .aa(&trigger.aa_address)?
        .ok_or_else(|| BraidError::Internal(format!("no AA at {}", trigger.aa_address)))?;
    let bounce_fees = row.definition.bounce_fees.unwrap_or_default();
    let base_fee = bounce_fees.get("base").copied().unwrap_or(DEFAULT_BOUNCE_FEE);
    let received_base = trigger.outputs.get("base").copied().unwrap_or(0);

    let mut staged = StagedAaState::default();
    for (asset, amount) in &trigger.outputs {
        staged.add_balance(&trigger.aa_address, asset, *amount as i128);
    }

    let record_silent = |ledger: &Ledger, reason: String| -> Result<Vec<Joint>, BraidError> {
        ledger.put_aa_response(
            0,
            &AaResponseRow {
                trigger_unit: trigger.unit.clone(),
                aa_address: trigger.aa_address.clone(),
                main_chain_index: trigger.main_chain_index,
                bounced: true,
                response_unit: None,
                error: Some(reason),
            },
        )?;
        Ok(Vec::new())
    };

    if received_base <= base_fee {
        // nothing worth refunding: the AA keeps the dust
        staged.commit(ledger)?;
        return record_silent(ledger, format!("{error} (refund below bounce fee)"));
    }

    // Build the refund payment directly, then settle fees via the shared
    // finalizer so conservation holds.
    let payload_value = serde_json::json!({
        "outputs": [{
            "address": trigger.trigger_address,
            "amount": received_base - base_fee,
        }]
    });
    let mut planned: Vec<SpendRef> = Vec::new();
    let built = build_payment_message(ledger, trigger, &staged, &planned, &payload_value);
    let (message, spends, deltas) = match built {
        Ok(Some(parts)) => parts,
        Ok(None) => {
            staged.commit(ledger)?;
            return record_silent(ledger, error.to_string());
        }
        Err(inner) if inner.kind() == ErrorKind::UnitError => {
            staged.commit(ledger)?;
            return record_silent(ledger, format!("{error}; bounce failed: {inner}"));
        }
        Err(inner) => return Err(inner),
    };

    let mc_unit = ledger
        .mc_unit_at(trigger.main_chain_index)?
        .ok_or_else(|| BraidError::Internal("no MC unit for bounce".into()))?;
    let mc_props = ledger.expect_unit_props(&mc_unit)?;
    let last_ball = ledger
        .ball_of(&mc_unit)?
        .ok_or_else(|| BraidError::Internal("no ball for bounce MC unit".into()))?;
    let genesis = ledger
        .genesis_unit()?
        .ok_or_else(|| BraidError::Internal("no genesis unit".into()))?;

    let mut unit = Unit {
        unit: UnitHash::new("A".repeat(44))?,
        version: VERSION.into(),
        alt: ALT.into(),
        parent_units: vec![trigger.unit.clone()],
        last_ball: Some(last_ball),
        last_ball_unit: Some(mc_unit),
        witness_list_unit: Some(genesis),
        witnesses: None,
        authors: vec![Author {
            address: trigger.aa_address.clone(),
            definition: None,
            authentifiers: BTreeMap::new(),
        }],
        messages: vec![message],
        timestamp: mc_props.timestamp,
        headers_commission: 0,
        payload_commission: 0,
        tps_fee: None,
        burn_fee: None,
        oversize_fee: None,
        max_aa_responses: None,
        earned_headers_commission_recipients: None,
        content_hash: None,
    };
    match finalize_response_unit(ledger, trigger, &staged, &mut unit) {
        Ok(()) => {}
        Err(inner) if inner.kind() == ErrorKind::UnitError => {
            staged.commit(ledger)?;
            return record_silent(ledger, format!("{error}; bounce failed: {inner}"));
        }
        Err(inner) => return Err(inner),
    }
    for (asset, delta) in deltas {
        staged.add_balance(&trigger.aa_address, &asset, delta);
    }
    staged.add_balance(
        &trigger.aa_address,
        "base",
        -(unit.total_commission() as i128),
    );
    planned.extend(spends);
    staged.commit(ledger)?;
    for (asset, src, msg, out) in &planned {
        ledger.add_spend_claim(asset, src, *msg, *out, &unit.unit)?;
        ledger.mark_output_spent(src, *msg, *out)?;
    }
    let joint = Joint::new(unit);
    ledger.put_aa_response(
        0,
        &AaResponseRow {
            trigger_unit: trigger.unit.clone(),
            aa_address: trigger.aa_address.clone(),
            main_chain_index: trigger.main_chain_index,
            bounced: true,
            response_unit: Some(joint.unit_hash().clone()),
            error: Some(error.to_string()),
        },
    )?;
    Ok(vec![joint])
}
