//! Intercompany elimination: bilateral matching of translated IC balances
//! and flows, with balanced elimination entries posted at the group entity.
//!
//! Matching is directional: for an ordered pair (seller, buyer) each
//! category compares the seller-side account tagged with the buyer as IC
//! partner against the buyer-side account tagged with the seller. Every
//! directional relationship is evaluated exactly once, so the symmetric
//! average never double-posts.

use std::fmt;
use std::time::Instant;

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{IntersectionStore, WriteMode};
use crate::types::{with_metadata, AccountId, CycleContext, EntityId, Money, StageOutput};
use crate::ConsolResult;

/// Intercompany elimination categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElimCategory {
    /// Seller's IC revenue vs. buyer's IC cost of goods sold.
    RevenueCogs,
    /// IC accounts receivable vs. IC accounts payable.
    ReceivablePayable,
    /// Dividend income at the holder vs. dividends paid at the payer.
    Dividend,
    /// IC loan receivable vs. IC loan payable.
    Loan,
    /// IC interest income vs. IC interest expense.
    Interest,
}

impl ElimCategory {
    pub const ALL: [ElimCategory; 5] = [
        ElimCategory::RevenueCogs,
        ElimCategory::ReceivablePayable,
        ElimCategory::Dividend,
        ElimCategory::Loan,
        ElimCategory::Interest,
    ];

    /// The two correlated account legs: (seller/holder side, buyer/issuer side).
    pub fn legs(&self) -> (AccountId, AccountId) {
        let (a, b) = match self {
            ElimCategory::RevenueCogs => ("IC_Revenue", "IC_COGS"),
            ElimCategory::ReceivablePayable => ("IC_AR", "IC_AP"),
            ElimCategory::Dividend => ("DividendIncome", "DividendsPaid"),
            ElimCategory::Loan => ("IC_LoanReceivable", "IC_LoanPayable"),
            ElimCategory::Interest => ("IC_InterestIncome", "IC_InterestExpense"),
        };
        (a.into(), b.into())
    }
}

impl fmt::Display for ElimCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElimCategory::RevenueCogs => "Revenue/COGS",
            ElimCategory::ReceivablePayable => "AR/AP",
            ElimCategory::Dividend => "Dividend",
            ElimCategory::Loan => "Loan",
            ElimCategory::Interest => "Interest",
        };
        f.write_str(s)
    }
}

/// A posted elimination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationEntry {
    pub seller: EntityId,
    pub buyer: EntityId,
    pub category: ElimCategory,
    /// avg(|seller side|, |buyer side|)
    pub amount: Money,
}

/// A bilateral difference beyond tolerance, reported instead of eliminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedPair {
    pub seller: EntityId,
    pub buyer: EntityId,
    pub category: ElimCategory,
    pub seller_amount: Money,
    pub buyer_amount: Money,
    pub diff: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationReport {
    pub entries: Vec<EliminationEntry>,
    pub unmatched: Vec<UnmatchedPair>,
    pub pairs_evaluated: usize,
}

/// Match and eliminate intercompany activity across a consolidation scope.
///
/// Entries are posted at `group_entity` in the elimination view, flow
/// `F_Elimination`, with the source entity as origin and the counterparty
/// as IC partner. Unmatched differences are collected, never fatal.
pub fn eliminate_scope<C>(
    ctx: &CycleContext,
    cube: &mut C,
    group_entity: &EntityId,
    scope: &[EntityId],
) -> ConsolResult<StageOutput<EliminationReport>>
where
    C: IntersectionStore + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let mut entries = Vec::new();
    let mut unmatched = Vec::new();
    let mut pairs_evaluated = 0usize;

    for seller in scope {
        for buyer in scope {
            if seller == buyer {
                continue;
            }
            for category in ElimCategory::ALL {
                pairs_evaluated += 1;
                let (seller_leg, buyer_leg) = category.legs();

                let seller_pov = PovKey::cell(
                    seller,
                    &seller_leg,
                    ConsolidationView::Translated,
                    ctx.period,
                    &ctx.scenario,
                )
                .with_ic_partner(buyer);
                let buyer_pov = PovKey::cell(
                    buyer,
                    &buyer_leg,
                    ConsolidationView::Translated,
                    ctx.period,
                    &ctx.scenario,
                )
                .with_ic_partner(seller);

                let seller_amount = cube.get_cell(&seller_pov)?;
                let buyer_amount = cube.get_cell(&buyer_pov)?;
                if seller_amount.is_zero() && buyer_amount.is_zero() {
                    continue;
                }

                let diff = (seller_amount.abs() - buyer_amount.abs()).abs();
                if diff <= ctx.tolerances.elimination {
                    let amount = (seller_amount.abs() + buyer_amount.abs()) / dec!(2);

                    let seller_elim = PovKey::cell(
                        group_entity,
                        &seller_leg,
                        ConsolidationView::Elimination,
                        ctx.period,
                        &ctx.scenario,
                    )
                    .with_flow(FlowMember::Elimination)
                    .with_origin(seller.0.clone())
                    .with_ic_partner(buyer);
                    let buyer_elim = PovKey::cell(
                        group_entity,
                        &buyer_leg,
                        ConsolidationView::Elimination,
                        ctx.period,
                        &ctx.scenario,
                    )
                    .with_flow(FlowMember::Elimination)
                    .with_origin(buyer.0.clone())
                    .with_ic_partner(seller);

                    // Balanced entry: the two legs net to zero.
                    cube.set_cell(&seller_elim, -amount, WriteMode::Replace)?;
                    cube.set_cell(&buyer_elim, amount, WriteMode::Replace)?;

                    entries.push(EliminationEntry {
                        seller: seller.clone(),
                        buyer: buyer.clone(),
                        category,
                        amount,
                    });
                } else {
                    warn!(
                        seller = %seller,
                        buyer = %buyer,
                        category = %category,
                        diff = %diff,
                        "IC pair beyond tolerance, not eliminated"
                    );
                    warnings.push(format!(
                        "Unmatched {category} between {seller} and {buyer}: diff {diff} exceeds tolerance {}",
                        ctx.tolerances.elimination
                    ));
                    unmatched.push(UnmatchedPair {
                        seller: seller.clone(),
                        buyer: buyer.clone(),
                        category,
                        seller_amount,
                        buyer_amount,
                        diff,
                    });
                }
            }
        }
    }

    info!(
        scope = scope.len(),
        eliminated = entries.len(),
        unmatched = unmatched.len(),
        "Elimination pass complete"
    );

    let assumptions = serde_json::json!({
        "group_entity": group_entity.0,
        "scope_size": scope.len(),
        "tolerance": ctx.tolerances.elimination.to_string(),
        "period": ctx.period.to_string(),
    });
    let report = EliminationReport {
        entries,
        unmatched,
        pairs_evaluated,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Intercompany Elimination (bilateral tolerance matching, averaged entry)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}
