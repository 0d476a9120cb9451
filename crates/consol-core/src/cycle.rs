//! One consolidation cycle over an entity subtree.
//!
//! Stages run in dependency order with hard barriers between them:
//! translation of every entity in scope, then intercompany elimination,
//! then bottom-up ownership consolidation with NCI and equity-method
//! processing at each parent, then manual journals, then roll-forward
//! reconciliation. Unmatched pairs, rejected journals and reconciliation
//! breaks are aggregated into one end-of-cycle report.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::elimination::{eliminate_scope, EliminationReport};
use crate::flows::{roll_forward_entity, FlowReport};
use crate::journals::{process_journals, JournalEntry, JournalReport};
use crate::ownership::equity::{equity_pickup, EquityPickup};
use crate::ownership::nci::{attribute_nci, NciReport};
use crate::ownership::{consolidate_parent, publish_standalone, OwnershipReport};
use crate::store::{IntersectionStore, MetadataService, RateProvider};
use crate::translation::{translate_entity, TranslationReport};
use crate::types::{with_metadata, CycleContext, EntityId, StageOutput};
use crate::ConsolResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub root: EntityId,
    pub translations: Vec<TranslationReport>,
    pub elimination: EliminationReport,
    pub ownership: Vec<OwnershipReport>,
    pub nci: Vec<NciReport>,
    pub equity_pickups: Vec<EquityPickup>,
    pub journals: JournalReport,
    pub flows: Vec<FlowReport>,
}

/// Run a full consolidation cycle for the subtree rooted at `root`.
pub fn run_cycle<C, R, M>(
    ctx: &CycleContext,
    cube: &mut C,
    rates: &R,
    meta: &M,
    root: &EntityId,
    journal_entries: &[JournalEntry],
) -> ConsolResult<StageOutput<CycleReport>>
where
    C: IntersectionStore + ?Sized,
    R: RateProvider + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let mut scope = meta.descendants(root)?;
    scope.push(root.clone());

    info!(
        root = %root,
        scope = scope.len(),
        period = %ctx.period,
        period_start = ?ctx.period.start_date(),
        "Consolidation cycle started"
    );

    // -- Stage 1: translation, independent per entity --
    let mut translations = Vec::new();
    for entity in &scope {
        let out = translate_entity(ctx, cube, rates, meta, entity)?;
        warnings.extend(out.warnings);
        translations.push(out.result);
    }

    // Each entity's standalone data becomes its own consolidated seed.
    for entity in &scope {
        publish_standalone(ctx, cube, meta, entity)?;
    }

    // -- Stage 2: elimination, after the translation barrier --
    let elim_out = eliminate_scope(ctx, cube, root, &scope)?;
    warnings.extend(elim_out.warnings);
    let elimination = elim_out.result;

    // -- Stage 3: ownership consolidation, strictly bottom-up --
    let mut ownership = Vec::new();
    let mut nci = Vec::new();
    let mut equity_pickups = Vec::new();
    for parent in parents_post_order(meta, root)? {
        let own_out = consolidate_parent(ctx, cube, meta, &parent)?;
        warnings.extend(own_out.warnings);
        let report = own_out.result;

        let nci_out = attribute_nci(ctx, cube, meta, &parent)?;
        warnings.extend(nci_out.warnings);
        if !nci_out.result.entries.is_empty() {
            nci.push(nci_out.result);
        }

        for investee in &report.equity_excluded {
            let pickup = equity_pickup(ctx, cube, rates, meta, &parent, investee)?;
            warnings.extend(pickup.warnings);
            equity_pickups.push(pickup.result);
        }

        ownership.push(report);
    }

    // -- Stage 4: manual journal entries --
    let je_out = process_journals(ctx, cube, journal_entries)?;
    warnings.extend(je_out.warnings);
    let journals = je_out.result;

    // -- Stage 5: roll-forward reconciliation, independent per entity --
    let mut flows = Vec::new();
    for entity in &scope {
        let out = roll_forward_entity(ctx, cube, rates, meta, entity)?;
        warnings.extend(out.warnings);
        flows.push(out.result);
    }

    info!(
        root = %root,
        unmatched = elimination.unmatched.len(),
        rejected_journals = journals.rejected,
        breaks = flows.iter().map(|f| f.breaks.len()).sum::<usize>(),
        "Consolidation cycle complete"
    );

    let assumptions = serde_json::json!({
        "root": root.0,
        "scope_size": scope.len(),
        "scenario": ctx.scenario,
        "period": ctx.period.to_string(),
    });
    let report = CycleReport {
        root: root.clone(),
        translations,
        elimination,
        ownership,
        nci,
        equity_pickups,
        journals,
        flows,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Consolidation Cycle (translate, eliminate, consolidate, journals, roll-forward)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}

/// Entities with children, children-first, so every parent aggregates after
/// its own descendants have been consolidated.
fn parents_post_order<M>(meta: &M, root: &EntityId) -> ConsolResult<Vec<EntityId>>
where
    M: MetadataService + ?Sized,
{
    let mut out = Vec::new();
    visit(meta, root, &mut out)?;
    return Ok(out);

    fn visit<M>(meta: &M, entity: &EntityId, out: &mut Vec<EntityId>) -> ConsolResult<()>
    where
        M: MetadataService + ?Sized,
    {
        let children = meta.children(entity)?;
        for child in &children {
            visit(meta, child, out)?;
        }
        if !children.is_empty() {
            out.push(entity.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCube, InMemoryMetadata, PROP_CONSOL_METHOD, PROP_CURRENCY, PROP_OWNERSHIP};

    #[test]
    fn test_parents_post_order_children_first() {
        let mut meta = InMemoryMetadata::new();
        let (root, mid, leaf1, leaf2): (EntityId, EntityId, EntityId, EntityId) =
            ("Group".into(), "Region_EU".into(), "Plant_DE".into(), "Plant_FR".into());
        meta.add_child(&root, &mid);
        meta.add_child(&mid, &leaf1);
        meta.add_child(&mid, &leaf2);
        meta.set_property(&root, PROP_CURRENCY, "USD");
        meta.set_property(&mid, PROP_CURRENCY, "USD");
        meta.set_property(&mid, PROP_OWNERSHIP, "1.0");
        meta.set_property(&mid, PROP_CONSOL_METHOD, "Full");

        let order = parents_post_order(&meta, &root).unwrap();
        assert_eq!(order, vec![mid, root]);
    }

    #[test]
    fn test_leaf_only_root_has_no_parents() {
        let meta = InMemoryMetadata::new();
        let root: EntityId = "Solo".into();
        assert!(parents_post_order(&meta, &root).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_runs_all_stages_on_empty_data() {
        let ctx = crate::types::CycleContext::new(
            "Actual",
            crate::types::Period::new(2025, 8),
            crate::types::Currency::USD,
        );
        let mut cube = InMemoryCube::new();
        let rates = crate::store::InMemoryRates::new();
        let mut meta = InMemoryMetadata::new();
        let (root, child): (EntityId, EntityId) = ("Group".into(), "OpCo".into());
        meta.add_child(&root, &child);
        meta.set_property(&root, PROP_CURRENCY, "USD");
        meta.set_property(&child, PROP_CURRENCY, "USD");

        let out = run_cycle(&ctx, &mut cube, &rates, &meta, &root, &[]).unwrap();
        let r = &out.result;
        assert_eq!(r.translations.len(), 2);
        assert_eq!(r.ownership.len(), 1);
        assert!(r.nci.is_empty());
        assert!(r.equity_pickups.is_empty());
        assert_eq!(r.journals.applied, 0);
        assert_eq!(r.flows.len(), 2);
    }
}
