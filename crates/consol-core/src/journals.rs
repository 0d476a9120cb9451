//! Manual journal entry validation, application and reversal.
//!
//! Every entry moves through a small state machine:
//! `Unvalidated -> { Balanced -> Applied [-> ReversalScheduled] ; Unbalanced -> Rejected }`.
//! Rejected entries are logged and audited, never applied and never fatal,
//! unless the bulk error threshold is exceeded.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{IntersectionStore, WriteMode};
use crate::types::{with_metadata, AccountId, CycleContext, EntityId, Money, Period, StageOutput};
use crate::{ConsolError, ConsolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalType {
    Reclass,
    Adjust,
    Elim,
    Correct,
}

impl JournalType {
    /// Reclass entries automatically reverse in the next period.
    pub fn is_reversing(&self) -> bool {
        matches!(self, JournalType::Reclass)
    }

    fn target_view(&self) -> ConsolidationView {
        match self {
            JournalType::Elim => ConsolidationView::Elimination,
            _ => ConsolidationView::Local,
        }
    }
}

impl FromStr for JournalType {
    type Err = ConsolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "RECLASS" => Ok(JournalType::Reclass),
            "ADJUST" => Ok(JournalType::Adjust),
            "ELIM" => Ok(JournalType::Elim),
            "CORRECT" => Ok(JournalType::Correct),
            other => Err(ConsolError::InvalidInput {
                field: "journal_type".into(),
                reason: format!("Unknown journal type '{other}'"),
            }),
        }
    }
}

/// One line: positive = debit, negative = credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalLine {
    pub account: AccountId,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub entity: EntityId,
    pub entry_type: JournalType,
    pub lines: Vec<JournalLine>,
}

/// A raw imported line before grouping by journal id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJournalLine {
    pub je_id: String,
    pub entity: EntityId,
    pub entry_type: JournalType,
    pub account: AccountId,
    pub amount: Money,
}

/// Group raw lines into entries by journal id, preserving line order.
pub fn group_lines(raw: &[RawJournalLine]) -> Vec<JournalEntry> {
    let mut grouped: BTreeMap<String, JournalEntry> = BTreeMap::new();
    for line in raw {
        grouped
            .entry(line.je_id.clone())
            .or_insert_with(|| JournalEntry {
                id: line.je_id.clone(),
                entity: line.entity.clone(),
                entry_type: line.entry_type,
                lines: Vec::new(),
            })
            .lines
            .push(JournalLine {
                account: line.account.clone(),
                amount: line.amount,
            });
    }
    grouped.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalStatus {
    Unvalidated,
    Balanced,
    Applied,
    ReversalScheduled,
    Rejected,
}

/// Audit record emitted for every entry, applied or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalAudit {
    pub id: String,
    pub entry_type: JournalType,
    pub line_count: usize,
    pub total_debits: Money,
    pub total_credits: Money,
    pub status: JournalStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalReport {
    pub applied: usize,
    pub rejected: usize,
    pub reversals_scheduled: usize,
    pub audits: Vec<JournalAudit>,
}

/// Validate and apply a batch of journal entries.
///
/// Unbalanced entries are rejected and audited; exceeding the context's
/// error threshold aborts the batch with an error.
pub fn process_journals<C>(
    ctx: &CycleContext,
    cube: &mut C,
    entries: &[JournalEntry],
) -> ConsolResult<StageOutput<JournalReport>>
where
    C: IntersectionStore + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();
    let mut audits = Vec::new();
    let mut applied = 0usize;
    let mut rejected = 0usize;
    let mut reversals = 0usize;

    for entry in entries {
        let total: Money = entry.lines.iter().map(|l| l.amount).sum();
        let total_debits: Money = entry
            .lines
            .iter()
            .filter(|l| l.amount > Decimal::ZERO)
            .map(|l| l.amount)
            .sum();
        let total_credits: Money = entry
            .lines
            .iter()
            .filter(|l| l.amount < Decimal::ZERO)
            .map(|l| -l.amount)
            .sum();

        let mut status = JournalStatus::Unvalidated;
        if total.abs() <= ctx.tolerances.journal_balance {
            status = JournalStatus::Balanced;
        }

        if status != JournalStatus::Balanced {
            warn!(
                je = %entry.id,
                imbalance = %total,
                "Journal entry is unbalanced, rejected"
            );
            warnings.push(format!(
                "JE {} rejected: debits {total_debits} vs credits {total_credits}",
                entry.id
            ));
            rejected += 1;
            if rejected > ctx.error_threshold {
                return Err(ConsolError::ErrorThreshold {
                    count: rejected,
                    limit: ctx.error_threshold,
                });
            }
            audits.push(JournalAudit {
                id: entry.id.clone(),
                entry_type: entry.entry_type,
                line_count: entry.lines.len(),
                total_debits,
                total_credits,
                status: JournalStatus::Rejected,
            });
            continue;
        }

        apply_entry(ctx, cube, entry, ctx.period)?;
        status = JournalStatus::Applied;
        applied += 1;

        if entry.entry_type.is_reversing() {
            let reversal = JournalEntry {
                id: format!("{}_REV", entry.id),
                entity: entry.entity.clone(),
                entry_type: entry.entry_type,
                lines: entry
                    .lines
                    .iter()
                    .map(|l| JournalLine {
                        account: l.account.clone(),
                        amount: -l.amount,
                    })
                    .collect(),
            };
            apply_entry(ctx, cube, &reversal, ctx.period.next())?;
            status = JournalStatus::ReversalScheduled;
            reversals += 1;
            info!(je = %entry.id, reversal = %reversal.id, "Reversal posted to next period");
        }

        audits.push(JournalAudit {
            id: entry.id.clone(),
            entry_type: entry.entry_type,
            line_count: entry.lines.len(),
            total_debits,
            total_credits,
            status,
        });
    }

    info!(applied, rejected, reversals, "Journal batch complete");

    let assumptions = serde_json::json!({
        "entry_count": entries.len(),
        "period": ctx.period.to_string(),
        "balance_tolerance": ctx.tolerances.journal_balance.to_string(),
    });
    let report = JournalReport {
        applied,
        rejected,
        reversals_scheduled: reversals,
        audits,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Journal Entry Processing (balance validation, application, auto-reversal)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}

/// Write one entry's lines, summed per account, tagged with the journal id
/// as origin for traceability.
fn apply_entry<C>(
    ctx: &CycleContext,
    cube: &mut C,
    entry: &JournalEntry,
    period: Period,
) -> ConsolResult<()>
where
    C: IntersectionStore + ?Sized,
{
    let view = entry.entry_type.target_view();
    let mut per_account: BTreeMap<&AccountId, Money> = BTreeMap::new();
    for line in &entry.lines {
        *per_account.entry(&line.account).or_insert(Decimal::ZERO) += line.amount;
    }
    for (account, amount) in per_account {
        let pov = PovKey::cell(&entry.entity, account, view, period, &ctx.scenario)
            .with_flow(FlowMember::ManualJe)
            .with_origin(entry.id.clone());
        cube.set_cell(&pov, amount, WriteMode::Replace)?;
    }
    Ok(())
}
