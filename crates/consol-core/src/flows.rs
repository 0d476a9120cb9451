//! Balance-sheet roll-forward: opening + movements = closing, reconciled
//! against an independently maintained total.
//!
//! Each (entity, account) rolls forward independently; the loop is a linear
//! accumulation with no shared state across accounts.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{resolve_rate, CurrencyPair, IntersectionStore, MetadataService, RateProvider, WriteMode};
use crate::types::{with_metadata, AccountId, CycleContext, EntityId, Money, RateType, StageOutput};
use crate::ConsolResult;

/// A closing balance that failed to reconcile against the stored total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationBreak {
    pub entity: EntityId,
    pub account: AccountId,
    pub computed_closing: Money,
    pub actual: Money,
    pub diff: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowReport {
    pub entity: EntityId,
    pub accounts_processed: usize,
    pub breaks: Vec<ReconciliationBreak>,
}

/// Roll forward every balance-sheet account of `entity` in the consolidated
/// view. Reconciliation mismatches are collected and reported, never fixed
/// up and never fatal.
pub fn roll_forward_entity<C, R, M>(
    ctx: &CycleContext,
    cube: &mut C,
    rates: &R,
    meta: &M,
    entity: &EntityId,
) -> ConsolResult<StageOutput<FlowReport>>
where
    C: IntersectionStore + ?Sized,
    R: RateProvider + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let mut breaks = Vec::new();
    let mut processed = 0usize;

    let local = meta.local_currency(entity, &ctx.group_currency)?;
    let foreign = local != ctx.group_currency;
    let pair = CurrencyPair::new(local.clone(), ctx.group_currency.clone());

    for member in meta.base_members("Account", "")? {
        let account = AccountId(member);
        let Some(acct) = meta.account_meta(&account)? else {
            continue;
        };
        if !acct.class.is_balance_sheet() {
            continue;
        }

        let flow_pov = |flow: FlowMember, period| {
            PovKey::cell(entity, &account, ConsolidationView::Consolidated, period, &ctx.scenario)
                .with_flow(flow)
        };

        // Opening is an assignment from the prior closing, enforcing
        // closing(t-1) == opening(t) exactly.
        let opening = cube.get_cell(&flow_pov(FlowMember::Closing, ctx.prior_period))?;
        let movement = cube.get_cell(&flow_pov(FlowMember::Movement, ctx.period))?;

        let mut fx_impact = cube.get_cell(&flow_pov(FlowMember::FxImpact, ctx.period))?;
        if foreign && fx_impact.is_zero() && !opening.is_zero() {
            // Estimate: openingLocal * (close - priorClose), where the local
            // opening is backed out at the prior closing rate. Approximation:
            // assumes the opening balance was translated at that rate, which
            // does not hold for historical-rate accounts.
            let prior_close = resolve_rate(rates, &pair, RateType::Closing, ctx.prior_period)?;
            let close = resolve_rate(rates, &pair, RateType::Closing, ctx.period)?;
            match (prior_close, close) {
                (Some(prior_close), Some(close)) if !prior_close.is_zero() => {
                    let opening_local = opening / prior_close;
                    fx_impact = opening_local * (close - prior_close);
                    cube.set_cell(&flow_pov(FlowMember::FxImpact, ctx.period), fx_impact, WriteMode::Replace)?;
                }
                _ => {
                    warn!(entity = %entity, account = %account, "No closing rates to estimate FX impact");
                    warnings.push(format!(
                        "FX impact for {entity}/{account} not estimable: missing closing rates"
                    ));
                }
            }
        }

        let elimination = cube.get_cell(&flow_pov(FlowMember::Elimination, ctx.period))?;
        let acquisition = cube.get_cell(&flow_pov(FlowMember::Acquisition, ctx.period))?;
        let disposal = cube.get_cell(&flow_pov(FlowMember::Disposal, ctx.period))?;

        let closing = opening + movement + fx_impact + elimination + acquisition + disposal;
        let actual = cube.get_cell(&flow_pov(FlowMember::Total, ctx.period))?;

        if opening.is_zero()
            && movement.is_zero()
            && fx_impact.is_zero()
            && elimination.is_zero()
            && acquisition.is_zero()
            && disposal.is_zero()
            && actual.is_zero()
        {
            continue;
        }

        cube.set_cell(&flow_pov(FlowMember::Opening, ctx.period), opening, WriteMode::Replace)?;
        cube.set_cell(&flow_pov(FlowMember::Closing, ctx.period), closing, WriteMode::Replace)?;
        processed += 1;

        let diff = (closing - actual).abs();
        if diff > ctx.tolerances.reconciliation {
            warn!(
                entity = %entity,
                account = %account,
                closing = %closing,
                actual = %actual,
                diff = %diff,
                "Roll-forward does not reconcile to the stored total"
            );
            warnings.push(format!(
                "{entity}/{account}: closing {closing} vs actual {actual} (diff {diff})"
            ));
            breaks.push(ReconciliationBreak {
                entity: entity.clone(),
                account: account.clone(),
                computed_closing: closing,
                actual,
                diff,
            });
        }
    }

    info!(
        entity = %entity,
        accounts = processed,
        breaks = breaks.len(),
        "Roll-forward complete"
    );

    let assumptions = serde_json::json!({
        "entity": entity.0,
        "period": ctx.period.to_string(),
        "tolerance": ctx.tolerances.reconciliation.to_string(),
    });
    let report = FlowReport {
        entity: entity.clone(),
        accounts_processed: processed,
        breaks,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Balance Sheet Roll-Forward (opening + movements = closing, reconciled to total)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}
