//! External collaborator contracts: the intersection store, the FX rate
//! provider, and the member-hierarchy/metadata service, plus in-memory
//! implementations used by tests and fixtures.
//!
//! Sparse-cube semantics apply throughout: an absent intersection reads as
//! zero and a zero rate means "not available".

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::warn;

use crate::pov::PovKey;
use crate::types::{
    AccountId, AccountMeta, ConsolidationMethod, Currency, EntityId, Money, Pct, Period, Rate,
    RateType,
};
use crate::{ConsolError, ConsolResult};

/// Write semantics for `set_cell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite the intersection.
    Replace,
    /// Add to the existing value (additive loads only; the engines use
    /// Replace for all calculated results).
    Accumulate,
}

/// Typed read/write access to the multidimensional store.
pub trait IntersectionStore {
    /// Read one intersection. Absence is not an error: returns zero.
    fn get_cell(&self, pov: &PovKey) -> ConsolResult<Money>;

    fn set_cell(&mut self, pov: &PovKey, amount: Money, mode: WriteMode) -> ConsolResult<()>;
}

/// An ordered currency pair: `rate` is units of `to` per one unit of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    pub from: Currency,
    pub to: Currency,
}

impl CurrencyPair {
    pub fn new(from: Currency, to: Currency) -> CurrencyPair {
        CurrencyPair { from, to }
    }

    pub fn inverted(&self) -> CurrencyPair {
        CurrencyPair {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.from, self.to)
    }
}

/// FX rates by pair, type and period.
pub trait RateProvider {
    /// Zero means "no rate loaded for this pair/type/period".
    fn get_rate(&self, pair: &CurrencyPair, rate_type: RateType, period: Period)
        -> ConsolResult<Rate>;
}

/// Resolve a rate with the inverse-pair fallback: if the direct pair is
/// unavailable, use `1 / rate(inverted)`. Returns `None` when neither side
/// is loaded; callers decide whether that is fatal.
pub fn resolve_rate<R: RateProvider + ?Sized>(
    rates: &R,
    pair: &CurrencyPair,
    rate_type: RateType,
    period: Period,
) -> ConsolResult<Option<Rate>> {
    let direct = rates.get_rate(pair, rate_type, period)?;
    if direct > Decimal::ZERO {
        return Ok(Some(direct));
    }
    let inverse = rates.get_rate(&pair.inverted(), rate_type, period)?;
    if inverse > Decimal::ZERO {
        Ok(Some(Decimal::ONE / inverse))
    } else {
        Ok(None)
    }
}

/// Entity property names understood by the typed accessors.
pub const PROP_CURRENCY: &str = "Currency";
pub const PROP_OWNERSHIP: &str = "OwnershipPct";
pub const PROP_CONSOL_METHOD: &str = "ConsolMethod";

/// Member hierarchy and metadata service.
///
/// The typed accessors apply the documented defaults for missing optional
/// properties (ownership 100%, method Full, currency falling back to the
/// caller-supplied currency) and log the substitution.
pub trait MetadataService {
    fn children(&self, entity: &EntityId) -> ConsolResult<Vec<EntityId>>;

    /// All strict descendants, children first at each level.
    fn descendants(&self, entity: &EntityId) -> ConsolResult<Vec<EntityId>> {
        let mut out = Vec::new();
        let mut queue = self.children(entity)?;
        while let Some(next) = queue.pop() {
            queue.extend(self.children(&next)?);
            out.push(next);
        }
        Ok(out)
    }

    fn entity_property(&self, entity: &EntityId, name: &str) -> ConsolResult<Option<String>>;

    fn base_members(&self, dimension: &str, filter: &str) -> ConsolResult<Vec<String>>;

    fn account_meta(&self, account: &AccountId) -> ConsolResult<Option<AccountMeta>>;

    fn local_currency(&self, entity: &EntityId, fallback: &Currency) -> ConsolResult<Currency> {
        match self.entity_property(entity, PROP_CURRENCY)? {
            Some(code) => Ok(Currency::from_code(&code)),
            None => {
                warn!(entity = %entity, fallback = %fallback, "No currency property, default applied");
                Ok(fallback.clone())
            }
        }
    }

    fn ownership(&self, entity: &EntityId) -> ConsolResult<Pct> {
        match self.entity_property(entity, PROP_OWNERSHIP)? {
            Some(raw) => raw.trim().parse::<Decimal>().map_err(|_| ConsolError::InvalidInput {
                field: PROP_OWNERSHIP.into(),
                reason: format!("Entity {entity}: '{raw}' is not a decimal"),
            }),
            None => {
                warn!(entity = %entity, "No ownership property, defaulting to 100%");
                Ok(Decimal::ONE)
            }
        }
    }

    fn consolidation_method(&self, entity: &EntityId) -> ConsolResult<ConsolidationMethod> {
        match self.entity_property(entity, PROP_CONSOL_METHOD)? {
            Some(raw) => raw.parse(),
            None => {
                warn!(entity = %entity, "No consolidation method property, defaulting to Full");
                Ok(ConsolidationMethod::Full)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// HashMap-backed cube. Keys are stored in wire format so the POV codec is
/// exercised on every access.
#[derive(Debug, Default)]
pub struct InMemoryCube {
    cells: HashMap<String, Money>,
    writes: usize,
}

impl InMemoryCube {
    pub fn new() -> InMemoryCube {
        InMemoryCube::default()
    }

    /// Seed a cell without counting it as an engine write.
    pub fn seed(&mut self, pov: &PovKey, amount: Money) {
        self.cells.insert(pov.to_string(), amount);
    }

    /// Number of writes performed through the store contract.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

impl IntersectionStore for InMemoryCube {
    fn get_cell(&self, pov: &PovKey) -> ConsolResult<Money> {
        Ok(self
            .cells
            .get(&pov.to_string())
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    fn set_cell(&mut self, pov: &PovKey, amount: Money, mode: WriteMode) -> ConsolResult<()> {
        let key = pov.to_string();
        let value = match mode {
            WriteMode::Replace => amount,
            WriteMode::Accumulate => self.cells.get(&key).copied().unwrap_or(Decimal::ZERO) + amount,
        };
        self.cells.insert(key, value);
        self.writes += 1;
        Ok(())
    }
}

/// Rate table keyed by pair id, type and period.
#[derive(Debug, Default)]
pub struct InMemoryRates {
    rates: HashMap<(String, RateType, Period), Rate>,
}

impl InMemoryRates {
    pub fn new() -> InMemoryRates {
        InMemoryRates::default()
    }

    pub fn set(&mut self, pair: &CurrencyPair, rate_type: RateType, period: Period, rate: Rate) {
        self.rates.insert((pair.id(), rate_type, period), rate);
    }
}

impl RateProvider for InMemoryRates {
    fn get_rate(
        &self,
        pair: &CurrencyPair,
        rate_type: RateType,
        period: Period,
    ) -> ConsolResult<Rate> {
        Ok(self
            .rates
            .get(&(pair.id(), rate_type, period))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

/// In-memory hierarchy, entity properties and account dimension.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    children: HashMap<EntityId, Vec<EntityId>>,
    properties: HashMap<(EntityId, String), String>,
    accounts: Vec<AccountMeta>,
}

impl InMemoryMetadata {
    pub fn new() -> InMemoryMetadata {
        InMemoryMetadata::default()
    }

    pub fn add_child(&mut self, parent: &EntityId, child: &EntityId) {
        self.children
            .entry(parent.clone())
            .or_default()
            .push(child.clone());
    }

    pub fn set_property(&mut self, entity: &EntityId, name: &str, value: impl Into<String>) {
        self.properties
            .insert((entity.clone(), name.to_string()), value.into());
    }

    pub fn add_account(&mut self, meta: AccountMeta) {
        self.accounts.push(meta);
    }
}

impl MetadataService for InMemoryMetadata {
    fn children(&self, entity: &EntityId) -> ConsolResult<Vec<EntityId>> {
        Ok(self.children.get(entity).cloned().unwrap_or_default())
    }

    fn entity_property(&self, entity: &EntityId, name: &str) -> ConsolResult<Option<String>> {
        Ok(self
            .properties
            .get(&(entity.clone(), name.to_string()))
            .cloned())
    }

    fn base_members(&self, dimension: &str, _filter: &str) -> ConsolResult<Vec<String>> {
        match dimension {
            "Account" => Ok(self.accounts.iter().map(|a| a.id.0.clone()).collect()),
            "Entity" => Ok(self.children.keys().map(|e| e.0.clone()).collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn account_meta(&self, account: &AccountId) -> ConsolResult<Option<AccountMeta>> {
        Ok(self.accounts.iter().find(|a| &a.id == account).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pov::ConsolidationView;
    use rust_decimal_macros::dec;

    fn pov() -> PovKey {
        PovKey::cell(
            &"E1".into(),
            &"Cash".into(),
            ConsolidationView::Local,
            Period::new(2025, 6),
            "Actual",
        )
    }

    #[test]
    fn test_absent_cell_reads_zero() {
        let cube = InMemoryCube::new();
        assert_eq!(cube.get_cell(&pov()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_replace_vs_accumulate() {
        let mut cube = InMemoryCube::new();
        cube.set_cell(&pov(), dec!(100), WriteMode::Replace).unwrap();
        cube.set_cell(&pov(), dec!(25), WriteMode::Accumulate).unwrap();
        assert_eq!(cube.get_cell(&pov()).unwrap(), dec!(125));
        cube.set_cell(&pov(), dec!(10), WriteMode::Replace).unwrap();
        assert_eq!(cube.get_cell(&pov()).unwrap(), dec!(10));
        assert_eq!(cube.write_count(), 3);
    }

    #[test]
    fn test_inverse_pair_fallback() {
        let mut rates = InMemoryRates::new();
        let eur_usd = CurrencyPair::new(Currency::EUR, Currency::USD);
        let period = Period::new(2025, 6);
        // Only the inverted pair is loaded: USD/EUR = 0.8 => EUR/USD = 1.25
        rates.set(&eur_usd.inverted(), RateType::Closing, period, dec!(0.8));

        let rate = resolve_rate(&rates, &eur_usd, RateType::Closing, period)
            .unwrap()
            .unwrap();
        assert_eq!(rate, dec!(1.25));
    }

    #[test]
    fn test_rate_unavailable_both_sides() {
        let rates = InMemoryRates::new();
        let pair = CurrencyPair::new(Currency::EUR, Currency::USD);
        let resolved = resolve_rate(&rates, &pair, RateType::Average, Period::new(2025, 1)).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn test_metadata_defaults_applied() {
        let meta = InMemoryMetadata::new();
        let e: EntityId = "NewCo".into();
        assert_eq!(meta.ownership(&e).unwrap(), Decimal::ONE);
        assert_eq!(
            meta.consolidation_method(&e).unwrap(),
            ConsolidationMethod::Full
        );
        assert_eq!(
            meta.local_currency(&e, &Currency::USD).unwrap(),
            Currency::USD
        );
    }

    #[test]
    fn test_metadata_invalid_ownership_rejected() {
        let mut meta = InMemoryMetadata::new();
        let e: EntityId = "BadCo".into();
        meta.set_property(&e, PROP_OWNERSHIP, "sixty percent");
        assert!(meta.ownership(&e).is_err());
    }

    #[test]
    fn test_descendants_transitive() {
        let mut meta = InMemoryMetadata::new();
        let (root, a, b, leaf): (EntityId, EntityId, EntityId, EntityId) =
            ("Root".into(), "A".into(), "B".into(), "Leaf".into());
        meta.add_child(&root, &a);
        meta.add_child(&root, &b);
        meta.add_child(&a, &leaf);
        let d = meta.descendants(&root).unwrap();
        assert_eq!(d.len(), 3);
        assert!(d.contains(&leaf));
    }
}
