//! Equity method: one-line pickup of a significant-influence investee's
//! earnings, dividend adjustments, and the FX impact of a foreign investee.

use std::time::Instant;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{resolve_rate, CurrencyPair, IntersectionStore, MetadataService, RateProvider, WriteMode};
use crate::types::{with_metadata, CycleContext, EntityId, Money, Pct, RateType, StageOutput};
use crate::ConsolResult;

/// Equity pickup for one investor/investee relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPickup {
    pub investor: EntityId,
    pub investee: EntityId,
    pub ownership: Pct,
    /// False when ownership is outside the significant-influence band.
    pub applied: bool,
    pub equity_share: Money,
    pub dividends_received: Money,
    pub fx_impact: Money,
}

impl EquityPickup {
    fn skipped(investor: &EntityId, investee: &EntityId, ownership: Pct) -> EquityPickup {
        EquityPickup {
            investor: investor.clone(),
            investee: investee.clone(),
            ownership,
            applied: false,
            equity_share: Decimal::ZERO,
            dividends_received: Decimal::ZERO,
            fx_impact: Decimal::ZERO,
        }
    }
}

/// Process the equity pickup of `investee` into `investor`'s books.
///
/// Applies only within the significant-influence band
/// `0.2 <= ownership <= 0.5`; outside it nothing is posted.
pub fn equity_pickup<C, R, M>(
    ctx: &CycleContext,
    cube: &mut C,
    rates: &R,
    meta: &M,
    investor: &EntityId,
    investee: &EntityId,
) -> ConsolResult<StageOutput<EquityPickup>>
where
    C: IntersectionStore + ?Sized,
    R: RateProvider + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let chart = &ctx.chart;
    let ownership = meta.ownership(investee)?;

    let assumptions = serde_json::json!({
        "investor": investor.0,
        "investee": investee.0,
        "ownership": ownership.to_string(),
        "period": ctx.period.to_string(),
    });

    if ownership < dec!(0.2) || ownership > dec!(0.5) {
        warn!(
            investor = %investor,
            investee = %investee,
            ownership = %ownership,
            "Ownership outside significant-influence band, equity method not applied"
        );
        warnings.push(format!(
            "Ownership {ownership} outside [0.2, 0.5]: no equity pickup for {investee}"
        ));
        let elapsed = start.elapsed().as_micros() as u64;
        return Ok(with_metadata(
            "Equity Method (not applicable)",
            &assumptions,
            warnings,
            elapsed,
            EquityPickup::skipped(investor, investee, ownership),
        ));
    }

    let read = |cube: &C, entity: &EntityId, account, view| -> ConsolResult<Money> {
        cube.get_cell(&PovKey::cell(entity, account, view, ctx.period, &ctx.scenario))
    };

    // -- Pickup: investor's share of the investee's consolidated NI --
    let investee_ni = read(cube, investee, &chart.net_income, ConsolidationView::Consolidated)?;
    let equity_share = investee_ni * ownership;

    // -- Dividends received reduce the investment, never income --
    let investee_dividends = read(cube, investee, &chart.dividends_paid, ConsolidationView::Consolidated)?;
    let dividends_received = investee_dividends.abs() * ownership;

    let investment = read(cube, investor, &chart.investment_in_affiliate, ConsolidationView::Consolidated)?;
    cube.set_cell(
        &PovKey::cell(investor, &chart.investment_in_affiliate, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
        investment + equity_share - dividends_received,
        WriteMode::Replace,
    )?;

    let earnings = read(cube, investor, &chart.equity_in_earnings, ConsolidationView::Consolidated)?;
    cube.set_cell(
        &PovKey::cell(investor, &chart.equity_in_earnings, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
        earnings + equity_share,
        WriteMode::Replace,
    )?;

    if !dividends_received.is_zero() {
        // Reclassify any dividend income the investor already booked.
        let dividend_income = read(cube, investor, &chart.dividend_income, ConsolidationView::Consolidated)?;
        cube.set_cell(
            &PovKey::cell(investor, &chart.dividend_income, ConsolidationView::Consolidated, ctx.period, &ctx.scenario),
            dividend_income - dividends_received,
            WriteMode::Replace,
        )?;
    }

    // -- FX impact of a foreign investee --
    // Recompute the local-currency share at average and closing; the
    // difference goes to OCI. Missing rates are non-fatal here.
    let investor_ccy = meta.local_currency(investor, &ctx.group_currency)?;
    let investee_ccy = meta.local_currency(investee, &ctx.group_currency)?;
    let mut fx_impact = Decimal::ZERO;
    if investor_ccy != investee_ccy {
        let local_ni = read(cube, investee, &chart.net_income, ConsolidationView::Local)?;
        let local_share = local_ni * ownership;
        let pair = CurrencyPair::new(investee_ccy, ctx.group_currency.clone());
        let avg = resolve_rate(rates, &pair, RateType::Average, ctx.period)?;
        let close = resolve_rate(rates, &pair, RateType::Closing, ctx.period)?;
        match (avg, close) {
            (Some(avg), Some(close)) => {
                fx_impact = local_share * close - local_share * avg;
                if !fx_impact.is_zero() {
                    let oci_pov = PovKey::cell(investor, &chart.oci, ConsolidationView::Consolidated, ctx.period, &ctx.scenario)
                        .with_flow(FlowMember::FxImpact)
                        .with_ic_partner(investee);
                    let current = cube.get_cell(&oci_pov)?;
                    cube.set_cell(&oci_pov, current + fx_impact, WriteMode::Replace)?;
                }
            }
            _ => {
                warn!(
                    investee = %investee,
                    pair = %pair.id(),
                    "Missing FX rate for equity pickup, impact set to zero"
                );
                warnings.push(format!(
                    "Missing FX rate for {}: equity-pickup FX impact set to zero",
                    pair.id()
                ));
            }
        }
    }

    info!(
        investor = %investor,
        investee = %investee,
        equity_share = %equity_share,
        dividends_received = %dividends_received,
        fx_impact = %fx_impact,
        "Equity pickup posted"
    );

    let report = EquityPickup {
        investor: investor.clone(),
        investee: investee.clone(),
        ownership,
        applied: true,
        equity_share,
        dividends_received,
        fx_impact,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Equity Method (pickup, dividend adjustment, FX impact to OCI)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}
