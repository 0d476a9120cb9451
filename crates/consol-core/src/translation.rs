//! Currency translation of an entity's local-currency trial balance into the
//! group reporting currency.
//!
//! Rate selection is driven by the account's rate class: income statement at
//! the period average, balance sheet at closing, contributed capital at the
//! historical rate fixed at issuance. Retained earnings is a recurrence
//! across periods, and CTA is the plug that balances the translated balance
//! sheet.

use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pov::{ConsolidationView, FlowMember, PovKey};
use crate::store::{resolve_rate, CurrencyPair, IntersectionStore, MetadataService, RateProvider, WriteMode};
use crate::types::{
    with_metadata, AccountClass, AccountId, Currency, CycleContext, EntityId, Money, Rate,
    RateClass, RateType, StageOutput,
};
use crate::{ConsolError, ConsolResult};

/// Per-entity translation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationReport {
    pub entity: EntityId,
    pub local_currency: Currency,
    /// False when local currency equals group currency (no-op).
    pub performed: bool,
    pub accounts_translated: usize,
    pub accounts_skipped: usize,
    pub translated_net_income: Money,
    pub cta: Money,
    pub cta_movement: Money,
}

impl TranslationReport {
    fn noop(entity: &EntityId, currency: &Currency) -> TranslationReport {
        TranslationReport {
            entity: entity.clone(),
            local_currency: currency.clone(),
            performed: false,
            accounts_translated: 0,
            accounts_skipped: 0,
            translated_net_income: Decimal::ZERO,
            cta: Decimal::ZERO,
            cta_movement: Decimal::ZERO,
        }
    }
}

/// Translate one entity for the context period.
///
/// A missing average or closing rate (after the inverse-pair fallback) is
/// fatal for the entity: nothing is written. A missing historical rate only
/// skips the historical-class accounts, logged as a warning.
pub fn translate_entity<C, R, M>(
    ctx: &CycleContext,
    cube: &mut C,
    rates: &R,
    meta: &M,
    entity: &EntityId,
) -> ConsolResult<StageOutput<TranslationReport>>
where
    C: IntersectionStore + ?Sized,
    R: RateProvider + ?Sized,
    M: MetadataService + ?Sized,
{
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let local = meta.local_currency(entity, &ctx.group_currency)?;
    let assumptions = serde_json::json!({
        "entity": entity.0,
        "local_currency": local.code(),
        "group_currency": ctx.group_currency.code(),
        "period": ctx.period.to_string(),
    });

    if local == ctx.group_currency {
        info!(entity = %entity, currency = %local, "Local currency equals group currency, translation skipped");
        let elapsed = start.elapsed().as_micros() as u64;
        return Ok(with_metadata(
            "Currency Translation (no-op: local == group)",
            &assumptions,
            warnings,
            elapsed,
            TranslationReport::noop(entity, &local),
        ));
    }

    let pair = CurrencyPair::new(local.clone(), ctx.group_currency.clone());
    let missing = |rate_type: RateType| ConsolError::MissingRate {
        pair: pair.id(),
        rate_type,
        period: ctx.period,
    };
    let avg = resolve_rate(rates, &pair, RateType::Average, ctx.period)?
        .ok_or_else(|| missing(RateType::Average))?;
    let close = resolve_rate(rates, &pair, RateType::Closing, ctx.period)?
        .ok_or_else(|| missing(RateType::Closing))?;
    // Historical is optional: absence skips contributed-capital accounts.
    let historical = resolve_rate(rates, &pair, RateType::Historical, ctx.period)?;

    let chart = &ctx.chart;
    let mut translated = 0usize;
    let mut skipped = 0usize;
    let mut assets = Decimal::ZERO;
    let mut liabilities = Decimal::ZERO;
    let mut equity_excl_cta = Decimal::ZERO;
    let mut revenue = Decimal::ZERO;
    let mut expense = Decimal::ZERO;

    for member in meta.base_members("Account", "")? {
        let account = AccountId(member);
        // Derived balances are produced below, never rate-multiplied.
        if account == chart.retained_earnings
            || account == chart.cta
            || account == chart.oci
            || account == chart.net_income
        {
            continue;
        }
        let Some(acct) = meta.account_meta(&account)? else {
            warn!(account = %account, "Unmapped account member, skipped");
            warnings.push(format!("Unmapped account member '{account}' skipped"));
            skipped += 1;
            continue;
        };
        if acct.class == AccountClass::Statistical {
            continue;
        }

        let local_pov = PovKey::cell(entity, &account, ConsolidationView::Local, ctx.period, &ctx.scenario);
        let local_amount = cube.get_cell(&local_pov)?;
        if local_amount.is_zero() {
            continue;
        }

        let rate: Rate = match acct.rate_class {
            RateClass::Average => avg,
            RateClass::Closing => close,
            RateClass::Historical => match historical {
                Some(h) => h,
                None => {
                    warn!(entity = %entity, account = %account, "No historical rate, account skipped");
                    warnings.push(format!(
                        "No historical rate for {}: account '{account}' not translated",
                        pair.id()
                    ));
                    skipped += 1;
                    continue;
                }
            },
            RateClass::Calculated => continue,
        };

        let amount = local_amount * rate;
        let out_pov = PovKey::cell(entity, &account, ConsolidationView::Translated, ctx.period, &ctx.scenario);
        cube.set_cell(&out_pov, amount, WriteMode::Replace)?;
        translated += 1;

        match acct.class {
            AccountClass::Asset => assets += amount,
            AccountClass::Liability => liabilities += amount,
            AccountClass::Equity => equity_excl_cta += amount,
            AccountClass::Revenue => revenue += amount,
            AccountClass::Expense => expense += amount,
            AccountClass::Statistical => {}
        }
    }

    // -- Translated net income --
    let net_income = revenue - expense;
    let ni_pov = PovKey::cell(entity, &chart.net_income, ConsolidationView::Translated, ctx.period, &ctx.scenario);
    cube.set_cell(&ni_pov, net_income, WriteMode::Replace)?;

    // -- Retained earnings recurrence --
    // RE(t) = RE(t-1) translated + translated NI - local dividends * avg
    let prior_re = cube.get_cell(&PovKey::cell(
        entity,
        &chart.retained_earnings,
        ConsolidationView::Translated,
        ctx.prior_period,
        &ctx.scenario,
    ))?;
    let local_dividends = cube.get_cell(&PovKey::cell(
        entity,
        &chart.dividends_paid,
        ConsolidationView::Local,
        ctx.period,
        &ctx.scenario,
    ))?;
    let retained = prior_re + net_income - local_dividends * avg;
    cube.set_cell(
        &PovKey::cell(entity, &chart.retained_earnings, ConsolidationView::Translated, ctx.period, &ctx.scenario),
        retained,
        WriteMode::Replace,
    )?;
    equity_excl_cta += retained;

    // -- CTA plug --
    let cta = assets - liabilities - equity_excl_cta;
    cube.set_cell(
        &PovKey::cell(entity, &chart.cta, ConsolidationView::Translated, ctx.period, &ctx.scenario),
        cta,
        WriteMode::Replace,
    )?;
    let prior_cta = cube.get_cell(&PovKey::cell(
        entity,
        &chart.cta,
        ConsolidationView::Translated,
        ctx.prior_period,
        &ctx.scenario,
    ))?;
    let cta_movement = cta - prior_cta;
    let oci_pov = PovKey::cell(entity, &chart.oci, ConsolidationView::Translated, ctx.period, &ctx.scenario)
        .with_flow(FlowMember::FxImpact);
    cube.set_cell(&oci_pov, cta_movement, WriteMode::Replace)?;

    info!(
        entity = %entity,
        pair = %pair.id(),
        accounts = translated,
        cta = %cta,
        "Translation complete"
    );

    let report = TranslationReport {
        entity: entity.clone(),
        local_currency: local,
        performed: true,
        accounts_translated: translated,
        accounts_skipped: skipped,
        translated_net_income: net_income,
        cta,
        cta_movement,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Currency Translation (average P&L, closing balance sheet, historical equity, CTA plug)",
        &assumptions,
        warnings,
        elapsed,
        report,
    ))
}
