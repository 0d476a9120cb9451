use consol_core::pov::{ConsolidationView, FlowMember, PovKey};
use consol_core::store::{CurrencyPair, InMemoryCube, InMemoryMetadata, InMemoryRates, IntersectionStore, PROP_CURRENCY};
use consol_core::translation::translate_entity;
use consol_core::types::{
    AccountClass, AccountMeta, Currency, CycleContext, EntityId, Money, NormalBalance, Period,
    RateClass, RateType,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn account(id: &str, class: AccountClass, rate_class: RateClass) -> AccountMeta {
    AccountMeta {
        id: id.into(),
        name: id.to_string(),
        class,
        normal_balance: match class {
            AccountClass::Asset | AccountClass::Expense => NormalBalance::Debit,
            _ => NormalBalance::Credit,
        },
        rate_class,
    }
}

fn plant_de_fixture() -> (CycleContext, InMemoryCube, InMemoryRates, InMemoryMetadata, EntityId) {
    let ctx = CycleContext::new("Actual", Period::new(2025, 8), Currency::USD);
    let mut cube = InMemoryCube::new();
    let mut rates = InMemoryRates::new();
    let mut meta = InMemoryMetadata::new();
    let plant: EntityId = "Plant_DE".into();

    meta.set_property(&plant, PROP_CURRENCY, "EUR");
    for a in [
        account("Revenue", AccountClass::Revenue, RateClass::Average),
        account("OperatingExpense", AccountClass::Expense, RateClass::Average),
        account("Cash", AccountClass::Asset, RateClass::Closing),
        account("PPE", AccountClass::Asset, RateClass::Closing),
        account("AccountsPayable", AccountClass::Liability, RateClass::Closing),
        account("ShareCapital", AccountClass::Equity, RateClass::Historical),
        account("RetainedEarnings", AccountClass::Equity, RateClass::Calculated),
        account("DividendsPaid", AccountClass::Equity, RateClass::Calculated),
        account("CTA", AccountClass::Equity, RateClass::Calculated),
        account("OCI", AccountClass::Equity, RateClass::Calculated),
    ] {
        meta.add_account(a);
    }

    let pair = CurrencyPair::new(Currency::EUR, Currency::USD);
    rates.set(&pair, RateType::Average, ctx.period, dec!(1.10));
    rates.set(&pair, RateType::Closing, ctx.period, dec!(1.12));
    rates.set(&pair, RateType::Historical, ctx.period, dec!(1.00));

    (ctx, cube, rates, meta, plant)
}

fn seed_local(cube: &mut InMemoryCube, ctx: &CycleContext, entity: &EntityId, account: &str, amount: Money) {
    cube.seed(
        &PovKey::cell(entity, &account.into(), ConsolidationView::Local, ctx.period, &ctx.scenario),
        amount,
    );
}

fn translated(cube: &InMemoryCube, ctx: &CycleContext, entity: &EntityId, account: &str) -> Money {
    cube.get_cell(&PovKey::cell(
        entity,
        &account.into(),
        ConsolidationView::Translated,
        ctx.period,
        &ctx.scenario,
    ))
    .unwrap()
}

// ===========================================================================
// Reference scenario: Plant_DE, EUR -> USD, avg 1.10, close 1.12
// ===========================================================================

#[test]
fn test_plant_de_reference_scenario() {
    let (ctx, mut cube, rates, meta, plant) = plant_de_fixture();
    seed_local(&mut cube, &ctx, &plant, "Revenue", dec!(1000000));
    seed_local(&mut cube, &ctx, &plant, "OperatingExpense", dec!(700000));
    seed_local(&mut cube, &ctx, &plant, "Cash", dec!(400000));
    seed_local(&mut cube, &ctx, &plant, "PPE", dec!(600000));
    seed_local(&mut cube, &ctx, &plant, "AccountsPayable", dec!(300000));
    seed_local(&mut cube, &ctx, &plant, "ShareCapital", dec!(250000));

    let out = translate_entity(&ctx, &mut cube, &rates, &meta, &plant).unwrap();
    let report = &out.result;

    // Local revenue 1,000,000 at avg 1.10
    assert_eq!(translated(&cube, &ctx, &plant, "Revenue"), dec!(1100000.00));
    // Assets at close 1.12
    assert_eq!(translated(&cube, &ctx, &plant, "Cash"), dec!(448000.00));
    assert_eq!(translated(&cube, &ctx, &plant, "PPE"), dec!(672000.00));
    // NI = (1,000,000 - 700,000) * 1.10 = 330,000, flows into RE
    assert_eq!(report.translated_net_income, dec!(330000.00));
    assert_eq!(translated(&cube, &ctx, &plant, "RetainedEarnings"), dec!(330000.00));

    // CTA is the plug: assets - liabilities - equity excl CTA
    // = (448,000 + 672,000) - 336,000 - (250,000 + 330,000) = 204,000
    assert_eq!(report.cta, dec!(204000.00));
    assert_eq!(translated(&cube, &ctx, &plant, "CTA"), dec!(204000.00));

    // Translated balance sheet balances after the plug.
    let assets = translated(&cube, &ctx, &plant, "Cash") + translated(&cube, &ctx, &plant, "PPE");
    let liabilities = translated(&cube, &ctx, &plant, "AccountsPayable");
    let equity = translated(&cube, &ctx, &plant, "ShareCapital")
        + translated(&cube, &ctx, &plant, "RetainedEarnings")
        + translated(&cube, &ctx, &plant, "CTA");
    assert_eq!(assets, liabilities + equity);
}

#[test]
fn test_cta_movement_written_to_oci() {
    let (ctx, mut cube, rates, meta, plant) = plant_de_fixture();
    cube.seed(
        &PovKey::cell(&plant, &"CTA".into(), ConsolidationView::Translated, ctx.prior_period, &ctx.scenario),
        dec!(150000),
    );
    seed_local(&mut cube, &ctx, &plant, "Cash", dec!(400000));
    seed_local(&mut cube, &ctx, &plant, "AccountsPayable", dec!(100000));

    let out = translate_entity(&ctx, &mut cube, &rates, &meta, &plant).unwrap();
    // CTA = 448,000 - 112,000 = 336,000; movement = 336,000 - 150,000
    assert_eq!(out.result.cta_movement, dec!(186000.00));

    let oci = cube
        .get_cell(
            &PovKey::cell(&plant, &"OCI".into(), ConsolidationView::Translated, ctx.period, &ctx.scenario)
                .with_flow(FlowMember::FxImpact),
        )
        .unwrap();
    assert_eq!(oci, dec!(186000.00));
}

// ===========================================================================
// Translation idempotence: same currency is a no-op
// ===========================================================================

#[test]
fn test_group_currency_entity_is_noop() {
    let (ctx, mut cube, rates, mut meta, _) = plant_de_fixture();
    let dist: EntityId = "Dist_US".into();
    meta.set_property(&dist, PROP_CURRENCY, "USD");
    seed_local(&mut cube, &ctx, &dist, "Revenue", dec!(500000));

    let writes_before = cube.write_count();
    let out = translate_entity(&ctx, &mut cube, &rates, &meta, &dist).unwrap();

    assert!(!out.result.performed);
    assert_eq!(out.result.local_currency, Currency::USD);
    assert_eq!(cube.write_count(), writes_before);
    assert_eq!(translated(&cube, &ctx, &dist, "Revenue"), Decimal::ZERO);
}

// ===========================================================================
// Failure semantics
// ===========================================================================

#[test]
fn test_missing_closing_rate_fatal_no_partial_writes() {
    let (ctx, mut cube, _, meta, plant) = plant_de_fixture();
    let mut rates = InMemoryRates::new();
    let pair = CurrencyPair::new(Currency::EUR, Currency::USD);
    rates.set(&pair, RateType::Average, ctx.period, dec!(1.10));
    seed_local(&mut cube, &ctx, &plant, "Revenue", dec!(1000000));
    seed_local(&mut cube, &ctx, &plant, "Cash", dec!(400000));

    let writes_before = cube.write_count();
    let err = translate_entity(&ctx, &mut cube, &rates, &meta, &plant).unwrap_err();
    assert!(matches!(
        err,
        consol_core::ConsolError::MissingRate { rate_type: RateType::Closing, .. }
    ));
    assert_eq!(cube.write_count(), writes_before);
}

#[test]
fn test_retained_earnings_recurrence_across_periods() {
    let (ctx, mut cube, rates, meta, plant) = plant_de_fixture();
    // August opens with July's translated closing RE of 90,000.
    cube.seed(
        &PovKey::cell(&plant, &"RetainedEarnings".into(), ConsolidationView::Translated, ctx.prior_period, &ctx.scenario),
        dec!(90000),
    );
    seed_local(&mut cube, &ctx, &plant, "Revenue", dec!(200000));
    seed_local(&mut cube, &ctx, &plant, "OperatingExpense", dec!(120000));
    seed_local(&mut cube, &ctx, &plant, "DividendsPaid", dec!(30000));

    translate_entity(&ctx, &mut cube, &rates, &meta, &plant).unwrap();
    // RE = 90,000 + 80,000 * 1.10 - 30,000 * 1.10 = 145,000
    assert_eq!(translated(&cube, &ctx, &plant, "RetainedEarnings"), dec!(145000.00));
}
