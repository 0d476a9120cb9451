use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConsolError;

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// FX rates (group units per one local unit). Never f64.
pub type Rate = Decimal;

/// Ownership percentages expressed as decimals (0.6 = 60%).
pub type Pct = Decimal;

/// Currency code
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    GBP,
    #[default]
    USD,
    EUR,
    CHF,
    JPY,
    CAD,
    AUD,
    HKD,
    SGD,
    Other(String),
}

impl Currency {
    pub fn code(&self) -> &str {
        match self {
            Currency::GBP => "GBP",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::CHF => "CHF",
            Currency::JPY => "JPY",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::HKD => "HKD",
            Currency::SGD => "SGD",
            Currency::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Currency {
        match code.trim().to_uppercase().as_str() {
            "GBP" => Currency::GBP,
            "USD" => Currency::USD,
            "EUR" => Currency::EUR,
            "CHF" => Currency::CHF,
            "JPY" => Currency::JPY,
            "CAD" => Currency::CAD,
            "AUD" => Currency::AUD,
            "HKD" => Currency::HKD,
            "SGD" => Currency::SGD,
            other => Currency::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A fiscal period, addressed as `<year>M<month>` on the wire (e.g. `2025M08`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Period {
        Period { year, month }
    }

    /// The following fiscal period (wraps at year end).
    pub fn next(&self) -> Period {
        if self.month >= 12 {
            Period::new(self.year + 1, 1)
        } else {
            Period::new(self.year, self.month + 1)
        }
    }

    /// The preceding fiscal period.
    pub fn prior(&self) -> Period {
        if self.month <= 1 {
            Period::new(self.year - 1, 12)
        } else {
            Period::new(self.year, self.month - 1)
        }
    }

    /// First calendar day of the period.
    pub fn start_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}M{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ConsolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(2, 'M').collect();
        let invalid = || ConsolError::InvalidInput {
            field: "period".into(),
            reason: format!("Expected '<year>M<month>', got '{s}'"),
        };
        if parts.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = parts[0].parse().map_err(|_| invalid())?;
        let month: u32 = parts[1].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Period::new(year, month))
    }
}

/// Entity dimension member id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// Account dimension member id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        AccountId(s.to_string())
    }
}

/// Account classification driving rate selection and statement membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountClass {
    Revenue,
    Expense,
    Asset,
    Liability,
    Equity,
    Statistical,
}

impl AccountClass {
    pub fn is_balance_sheet(&self) -> bool {
        matches!(
            self,
            AccountClass::Asset | AccountClass::Liability | AccountClass::Equity
        )
    }
}

/// Natural sign of an account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalBalance {
    Debit,
    Credit,
}

/// Which FX rate an account translates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateClass {
    Average,
    Closing,
    Historical,
    /// Derived balances (retained earnings, CTA) — never a single-rate multiply.
    Calculated,
}

/// FX rate type as exposed by the rate provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateType {
    Average,
    Closing,
    Historical,
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateType::Average => "average",
            RateType::Closing => "closing",
            RateType::Historical => "historical",
        };
        f.write_str(s)
    }
}

/// How an entity's results enter the group figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsolidationMethod {
    #[default]
    Full,
    Proportional,
    Equity,
}

impl FromStr for ConsolidationMethod {
    type Err = ConsolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(ConsolidationMethod::Full),
            "proportional" => Ok(ConsolidationMethod::Proportional),
            "equity" => Ok(ConsolidationMethod::Equity),
            other => Err(ConsolError::InvalidInput {
                field: "consolidation_method".into(),
                reason: format!("Unknown method '{other}'"),
            }),
        }
    }
}

/// Typed account configuration record, fetched through the metadata contract
/// rather than inferred from data cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMeta {
    pub id: AccountId,
    pub name: String,
    pub class: AccountClass,
    pub normal_balance: NormalBalance,
    pub rate_class: RateClass,
}

/// Well-known account ids the engines post to. Overridable per deployment;
/// the defaults match the standard group chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRefs {
    pub retained_earnings: AccountId,
    pub net_income: AccountId,
    pub dividends_paid: AccountId,
    pub dividend_income: AccountId,
    pub cta: AccountId,
    pub oci: AccountId,
    pub ni_attributable: AccountId,
    pub nci_income: AccountId,
    pub equity_attributable: AccountId,
    pub nci_equity: AccountId,
    pub investment_in_affiliate: AccountId,
    pub equity_in_earnings: AccountId,
}

impl Default for ChartRefs {
    fn default() -> Self {
        ChartRefs {
            retained_earnings: "RetainedEarnings".into(),
            net_income: "NetIncome".into(),
            dividends_paid: "DividendsPaid".into(),
            dividend_income: "DividendIncome".into(),
            cta: "CTA".into(),
            oci: "OCI".into(),
            ni_attributable: "NI_Attributable".into(),
            nci_income: "NCI_ShareOfNI".into(),
            equity_attributable: "Equity_Attributable".into(),
            nci_equity: "NonControllingInterest".into(),
            investment_in_affiliate: "InvestmentInAffiliate".into(),
            equity_in_earnings: "EquityInEarnings".into(),
        }
    }
}

/// Matching and reconciliation tolerances, in group currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Intercompany matching tolerance.
    pub elimination: Money,
    /// Roll-forward closing vs. actual tolerance.
    pub reconciliation: Money,
    /// Journal entry debit/credit balance tolerance.
    pub journal_balance: Money,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances {
            elimination: dec!(1000),
            reconciliation: dec!(0.01),
            journal_balance: dec!(0.01),
        }
    }
}

/// Immutable per-cycle context passed explicitly to every operation.
/// There is no ambient session state anywhere in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleContext {
    pub scenario: String,
    pub period: Period,
    pub prior_period: Period,
    pub group_currency: Currency,
    pub chart: ChartRefs,
    pub tolerances: Tolerances,
    /// Bulk-processing abort threshold (rejected rows per run).
    pub error_threshold: usize,
}

impl CycleContext {
    pub fn new(scenario: impl Into<String>, period: Period, group_currency: Currency) -> Self {
        CycleContext {
            scenario: scenario.into(),
            period,
            prior_period: period.prior(),
            group_currency,
            chart: ChartRefs::default(),
            tolerances: Tolerances::default(),
            error_threshold: 1000,
        }
    }
}

/// Standard stage output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: StageMetadata,
}

/// Metadata attached to every stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap stage results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> StageOutput<T> {
    StageOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: StageMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}
