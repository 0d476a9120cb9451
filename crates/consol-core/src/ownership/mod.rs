//! Ownership-based consolidation: per-entity method dispatch (full,
//! proportional, equity) and parent rollups over the entity hierarchy.
//!
//! Aggregation is strictly bottom-up: a parent reads its children's
//! consolidated view, which the children's own consolidation pass must have
//! produced first.

pub mod equity;
pub mod nci;

use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pov::{ConsolidationView, PovKey};
use crate::store::{IntersectionStore, MetadataService, WriteMode};
use crate::types::{
    with_metadata, AccountClass, AccountId, ConsolidationMethod, CycleContext, EntityId, Pct,
    StageOutput,
};
use crate::{ConsolError, ConsolResult};

/// Result of one parent's rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipReport {
    pub parent: EntityId,
    pub full: Vec<EntityId>,
    pub proportional: Vec<(EntityId, Pct)>,
    /// Equity-method investees: excluded from line-item aggregation.
    pub equity_excluded: Vec<EntityId>,
    pub accounts_written: usize,
}

/// Copy an entity's standalone amounts into its own consolidated view.
///
/// The source is the translated view when the entity reports in a foreign
/// currency, otherwise the local view. Leaf entities must be published
/// before any parent aggregates them.
pub fn publish_standalone<C, M>(
    ctx: &CycleContext,
    cube: &mut C,
    meta: &M,
    entity: &EntityId,
) -> ConsolResult<usize>
where
    C: IntersectionStore + ?Sized,
    M: MetadataService + ?Sized,
{
    let source = standalone_view(ctx, meta, entity)?;
    let mut written = 0usize;
    for account in account_members(meta)? {
        let amount = cube.get_cell(&PovKey::cell(entity, &account, source, ctx.period, &ctx.scenario))?;
        if amount.is_zero() {
            continue;
        }
        cube.set_cell(
            &PovKey::cell(entity, &account, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            amount,
            WriteMode::Replace,
        )?;
        written += 1;
    }
    Ok(written)
}

/// Aggregate a parent's children into the parent's consolidated view,
/// dispatching on each child's consolidation method.
pub fn consolidate_parent<C, M>(
    ctx: &CycleContext,
    cube: &mut C,
    meta: &M,
    parent: &EntityId,
) -> ConsolResult<StageOutput<OwnershipReport>>
where
    C: IntersectionStore + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    // Method and factor are entity-scoped metadata, read once per cycle.
    let mut full = Vec::new();
    let mut proportional = Vec::new();
    let mut equity_excluded = Vec::new();
    let mut factors: Vec<(EntityId, Pct)> = Vec::new();

    for child in meta.children(parent)? {
        let method = meta.consolidation_method(&child)?;
        let ownership = meta.ownership(&child)?;
        if ownership <= Decimal::ZERO || ownership > Decimal::ONE {
            return Err(ConsolError::InvalidInput {
                field: "ownership".into(),
                reason: format!("Entity {child}: ownership {ownership} outside (0, 1]"),
            });
        }
        match method {
            ConsolidationMethod::Full => {
                factors.push((child.clone(), Decimal::ONE));
                full.push(child);
            }
            ConsolidationMethod::Proportional => {
                factors.push((child.clone(), ownership));
                proportional.push((child, ownership));
            }
            ConsolidationMethod::Equity => {
                // Only the investor's equity pickup flows up (see equity.rs).
                equity_excluded.push(child);
            }
        }
    }

    let standalone = standalone_view(ctx, meta, parent)?;
    let mut accounts_written = 0usize;

    for account in account_members(meta)? {
        let mut total = cube.get_cell(&PovKey::cell(parent, &account, standalone, ctx.period, &ctx.scenario))?;
        for (child, factor) in &factors {
            let child_amount = cube.get_cell(&PovKey::cell(
                child,
                &account,
                ConsolidationView::Consolidated,
                ctx.period,
                &ctx.scenario,
            ))?;
            total += child_amount * *factor;
        }
        let out_pov = PovKey::cell(parent, &account, ConsolidationView::Consolidated, ctx.period, &ctx.scenario);
        // A zero total must still replace a previously published standalone
        // amount when children net the parent's own balance out.
        if total.is_zero() && cube.get_cell(&out_pov)?.is_zero() {
            continue;
        }
        cube.set_cell(&out_pov, total, WriteMode::Replace)?;
        accounts_written += 1;
    }

    info!(
        parent = %parent,
        full = full.len(),
        proportional = proportional.len(),
        equity = equity_excluded.len(),
        "Ownership consolidation complete"
    );

    let assumptions = serde_json::json!({
        "parent": parent.0,
        "period": ctx.period.to_string(),
    });
    let report = OwnershipReport {
        parent: parent.clone(),
        full,
        proportional,
        equity_excluded,
        accounts_written,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Ownership Consolidation (full / proportional / equity dispatch)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}

fn standalone_view<M>(
    ctx: &CycleContext,
    meta: &M,
    entity: &EntityId,
) -> ConsolResult<ConsolidationView>
where
    M: MetadataService + ?Sized,
{
    let local = meta.local_currency(entity, &ctx.group_currency)?;
    Ok(if local == ctx.group_currency {
        ConsolidationView::Local
    } else {
        ConsolidationView::Translated
    })
}

fn account_members<M>(meta: &M) -> ConsolResult<Vec<AccountId>>
where
    M: MetadataService + ?Sized,
{
    let mut out = Vec::new();
    for member in meta.base_members("Account", "")? {
        let account = AccountId(member);
        match meta.account_meta(&account)? {
            Some(m) if m.class == AccountClass::Statistical => {}
            _ => out.push(account),
        }
    }
    Ok(out)
}

/// Sum of an entity's consolidated equity-class accounts.
pub(crate) fn consolidated_total_equity<C, M>(
    ctx: &CycleContext,
    cube: &C,
    meta: &M,
    entity: &EntityId,
) -> ConsolResult<Decimal>
where
    C: IntersectionStore + ?Sized,
    M: MetadataService + ?Sized,
{
    let mut total = Decimal::ZERO;
    for member in meta.base_members("Account", "")? {
        let account = AccountId(member);
        let Some(m) = meta.account_meta(&account)? else {
            continue;
        };
        if m.class != AccountClass::Equity {
            continue;
        }
        total += cube.get_cell(&PovKey::cell(
            entity,
            &account,
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))?;
    }
    Ok(total)
}
