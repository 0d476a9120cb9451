//! Non-controlling interest: the minority shareholders' share of income and
//! equity in partially-owned, fully-consolidated subsidiaries.

use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ownership::consolidated_total_equity;
use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{IntersectionStore, MetadataService, WriteMode};
use crate::types::{with_metadata, ConsolidationMethod, CycleContext, EntityId, Money, Pct, StageOutput};
use crate::ConsolResult;

/// NCI attribution for one child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NciResult {
    pub child: EntityId,
    pub ownership: Pct,
    pub nci_pct: Pct,
    pub share_of_income: Money,
    pub share_of_equity: Money,
    pub opening: Money,
    pub share_of_oci: Money,
    pub share_of_dividends: Money,
    /// opening + share of NI + share of OCI - share of dividends
    pub closing: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NciReport {
    pub parent: EntityId,
    pub entries: Vec<NciResult>,
}

/// Attribute NCI for every eligible child of `parent`.
///
/// Eligible means fully consolidated with `0.5 < ownership < 1.0`; exactly
/// 0.5 or 1.0 produces no NCI entries. Must run after the parent's rollup,
/// since it reads the children's consolidated income and equity.
pub fn attribute_nci<C, M>(
    ctx: &CycleContext,
    cube: &mut C,
    meta: &M,
    parent: &EntityId,
) -> ConsolResult<StageOutput<NciReport>>
where
    C: IntersectionStore + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();
    let chart = &ctx.chart;
    let half = dec!(0.5);

    let mut entries: Vec<NciResult> = Vec::new();
    let mut total_income_share = Decimal::ZERO;
    let mut total_equity_share = Decimal::ZERO;

    for child in meta.children(parent)? {
        if meta.consolidation_method(&child)? != ConsolidationMethod::Full {
            continue;
        }
        let ownership = meta.ownership(&child)?;
        if ownership <= half || ownership >= Decimal::ONE {
            continue;
        }
        let nci_pct = Decimal::ONE - ownership;

        let child_ni = cube.get_cell(&PovKey::cell(
            &child,
            &chart.net_income,
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))?;
        let child_equity = consolidated_total_equity(ctx, cube, meta, &child)?;
        let child_oci = cube.get_cell(&PovKey::cell(
            &child,
            &chart.oci,
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))?;
        let child_dividends = cube.get_cell(&PovKey::cell(
            &child,
            &chart.dividends_paid,
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))?;

        let share_of_income = child_ni * nci_pct;
        let share_of_equity = child_equity * nci_pct;
        let share_of_oci = child_oci * nci_pct;
        let share_of_dividends = child_dividends.abs() * nci_pct;

        // Per-child NCI balance roll-forward, tracked with the child as IC
        // partner so next period's opening can be read back.
        let opening = cube.get_cell(
            &PovKey::cell(parent, &chart.nci_equity, ConsolidationView::Consolidated, ctx.prior_period, &ctx.scenario)
                .with_flow(FlowMember::Closing)
                .with_ic_partner(&child),
        )?;
        let closing = opening + share_of_income + share_of_oci - share_of_dividends;
        cube.set_cell(
            &PovKey::cell(parent, &chart.nci_equity, ConsolidationView::Consolidated, ctx.period, &ctx.scenario)
                .with_flow(FlowMember::Closing)
                .with_ic_partner(&child),
            closing,
            WriteMode::Replace,
        )?;

        info!(
            parent = %parent,
            child = %child,
            nci_pct = %nci_pct,
            share_of_income = %share_of_income,
            closing_nci = %closing,
            "NCI attributed"
        );

        total_income_share += share_of_income;
        total_equity_share += share_of_equity;
        entries.push(NciResult {
            child,
            ownership,
            nci_pct,
            share_of_income,
            share_of_equity,
            opening,
            share_of_oci,
            share_of_dividends,
            closing,
        });
    }

    if !entries.is_empty() {
        // Income split: debit reduces parent-attributable NI, credit NCI line.
        let parent_ni = cube.get_cell(&PovKey::cell(
            parent,
            &chart.net_income,
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))?;
        cube.set_cell(
            &PovKey::cell(parent, &chart.ni_attributable, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            parent_ni - total_income_share,
            WriteMode::Replace,
        )?;
        cube.set_cell(
            &PovKey::cell(parent, &chart.nci_income, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            total_income_share,
            WriteMode::Replace,
        )?;

        // Equity split mirrors the income split.
        let parent_equity = consolidated_total_equity(ctx, cube, meta, parent)?;
        cube.set_cell(
            &PovKey::cell(parent, &chart.equity_attributable, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            parent_equity - total_equity_share,
            WriteMode::Replace,
        )?;
        cube.set_cell(
            &PovKey::cell(parent, &chart.nci_equity, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            total_equity_share,
            WriteMode::Replace,
        )?;
    }

    let assumptions = serde_json::json!({
        "parent": parent.0,
        "period": ctx.period.to_string(),
    });
    let report = NciReport {
        parent: parent.clone(),
        entries,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Non-Controlling Interest Attribution (income and equity splits, balance roll-forward)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCube, InMemoryMetadata, PROP_CONSOL_METHOD, PROP_OWNERSHIP};
    use crate::types::{AccountClass, AccountMeta, Currency, NormalBalance, Period, RateClass};

    fn fixture() -> (CycleContext, InMemoryCube, InMemoryMetadata, EntityId, EntityId) {
        let ctx = CycleContext::new("Actual", Period::new(2025, 8), Currency::USD);
        let cube = InMemoryCube::new();
        let mut meta = InMemoryMetadata::new();
        let parent: EntityId = "HoldCo".into();
        let child: EntityId = "OpCo".into();
        meta.add_child(&parent, &child);
        for (id, class) in [
            ("NetIncome", AccountClass::Revenue),
            ("ShareCapital", AccountClass::Equity),
            ("RetainedEarnings", AccountClass::Equity),
            ("OCI", AccountClass::Equity),
            ("DividendsPaid", AccountClass::Equity),
        ] {
            meta.add_account(AccountMeta {
                id: id.into(),
                name: id.to_string(),
                class,
                normal_balance: NormalBalance::Credit,
                rate_class: RateClass::Calculated,
            });
        }
        (ctx, cube, meta, parent, child)
    }

    fn seed(cube: &mut InMemoryCube, ctx: &CycleContext, entity: &EntityId, account: &str, amount: Money) {
        cube.seed(
            &PovKey::cell(entity, &account.into(), ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            amount,
        );
    }

    fn read(cube: &InMemoryCube, ctx: &CycleContext, entity: &EntityId, account: &str) -> Money {
        cube.get_cell(&PovKey::cell(
            entity,
            &account.into(),
            ConsolidationView::Consolidated,
            ctx.period,
            &ctx.scenario,
        ))
        .unwrap()
    }

    #[test]
    fn test_sixty_percent_ownership_gives_forty_percent_nci() {
        let (ctx, mut cube, mut meta, parent, child) = fixture();
        meta.set_property(&child, PROP_OWNERSHIP, "0.6");
        meta.set_property(&child, PROP_CONSOL_METHOD, "Full");
        seed(&mut cube, &ctx, &child, "NetIncome", dec!(100000));
        seed(&mut cube, &ctx, &child, "ShareCapital", dec!(500000));
        seed(&mut cube, &ctx, &parent, "NetIncome", dec!(100000));

        let out = attribute_nci(&ctx, &mut cube, &meta, &parent).unwrap();
        let e = &out.result.entries[0];
        assert_eq!(e.nci_pct, dec!(0.4));
        assert_eq!(e.share_of_income, dec!(40000.0));
        assert_eq!(e.share_of_equity, dec!(200000.0));

        assert_eq!(read(&cube, &ctx, &parent, "NI_Attributable"), dec!(60000.0));
        assert_eq!(read(&cube, &ctx, &parent, "NCI_ShareOfNI"), dec!(40000.0));
        assert_eq!(read(&cube, &ctx, &parent, "NonControllingInterest"), dec!(200000.0));
    }

    #[test]
    fn test_boundary_ownership_produces_no_nci() {
        for pct in ["0.5", "1.0", "0.4"] {
            let (ctx, mut cube, mut meta, parent, child) = fixture();
            meta.set_property(&child, PROP_OWNERSHIP, pct);
            meta.set_property(&child, PROP_CONSOL_METHOD, "Full");
            seed(&mut cube, &ctx, &child, "NetIncome", dec!(100000));

            let before = cube.write_count();
            let out = attribute_nci(&ctx, &mut cube, &meta, &parent).unwrap();
            assert!(out.result.entries.is_empty(), "ownership {pct} must not produce NCI");
            assert_eq!(cube.write_count(), before);
        }
    }

    #[test]
    fn test_equity_method_child_skipped() {
        let (ctx, mut cube, mut meta, parent, child) = fixture();
        meta.set_property(&child, PROP_OWNERSHIP, "0.6");
        meta.set_property(&child, PROP_CONSOL_METHOD, "Equity");
        seed(&mut cube, &ctx, &child, "NetIncome", dec!(100000));

        let out = attribute_nci(&ctx, &mut cube, &meta, &parent).unwrap();
        assert!(out.result.entries.is_empty());
    }

    #[test]
    fn test_nci_roll_forward() {
        let (ctx, mut cube, mut meta, parent, child) = fixture();
        meta.set_property(&child, PROP_OWNERSHIP, "0.75");
        meta.set_property(&child, PROP_CONSOL_METHOD, "Full");
        // Prior-period closing NCI balance for this child.
        cube.seed(
            &PovKey::cell(&parent, &"NonControllingInterest".into(), ConsolidationView::Consolidated, ctx.prior_period, &ctx.scenario)
                .with_flow(FlowMember::Closing)
                .with_ic_partner(&child),
            dec!(80000),
        );
        seed(&mut cube, &ctx, &child, "NetIncome", dec!(40000));
        seed(&mut cube, &ctx, &child, "OCI", dec!(8000));
        seed(&mut cube, &ctx, &child, "DividendsPaid", dec!(12000));

        let out = attribute_nci(&ctx, &mut cube, &meta, &parent).unwrap();
        let e = &out.result.entries[0];
        // nci% = 0.25: closing = 80,000 + 10,000 + 2,000 - 3,000 = 89,000
        assert_eq!(e.opening, dec!(80000));
        assert_eq!(e.share_of_income, dec!(10000.00));
        assert_eq!(e.share_of_oci, dec!(2000.00));
        assert_eq!(e.share_of_dividends, dec!(3000.00));
        assert_eq!(e.closing, dec!(89000.00));

        // Closing balance is written back for next period's opening read.
        let written = cube
            .get_cell(
                &PovKey::cell(&parent, &"NonControllingInterest".into(), ConsolidationView::Consolidated, ctx.period, &ctx.scenario)
                    .with_flow(FlowMember::Closing)
                    .with_ic_partner(&child),
            )
            .unwrap();
        assert_eq!(written, dec!(89000.00));
    }
}
