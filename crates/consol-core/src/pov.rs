//! Strongly-typed intersection (POV) key.
//!
//! Every financial amount lives at one intersection of the cube's axes. The
//! engines construct and pass [`PovKey`] values; the colon-separated wire
//! format (`E#Plant_DE:A#Revenue:C#C_Translated:...`) exists only at the
//! store boundary, via `Display` and `FromStr`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConsolError;
use crate::types::{AccountId, EntityId, Period};
use crate::ConsolResult;

/// Consolidation view axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsolidationView {
    Local,
    Translated,
    Consolidated,
    Elimination,
}

impl ConsolidationView {
    pub fn member(&self) -> &'static str {
        match self {
            ConsolidationView::Local => "C_Local",
            ConsolidationView::Translated => "C_Translated",
            ConsolidationView::Consolidated => "C_Consolidated",
            ConsolidationView::Elimination => "C_Elimination",
        }
    }

    pub fn from_member(s: &str) -> Option<ConsolidationView> {
        match s {
            "C_Local" => Some(ConsolidationView::Local),
            "C_Translated" => Some(ConsolidationView::Translated),
            "C_Consolidated" => Some(ConsolidationView::Consolidated),
            "C_Elimination" => Some(ConsolidationView::Elimination),
            _ => None,
        }
    }
}

/// Flow (roll-forward movement) axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowMember {
    None,
    Opening,
    Movement,
    FxImpact,
    Elimination,
    Acquisition,
    Disposal,
    Closing,
    Total,
    ManualJe,
}

impl FlowMember {
    pub fn member(&self) -> &'static str {
        match self {
            FlowMember::None => "F_None",
            FlowMember::Opening => "F_Opening",
            FlowMember::Movement => "F_Movement",
            FlowMember::FxImpact => "F_FXImpact",
            FlowMember::Elimination => "F_Elimination",
            FlowMember::Acquisition => "F_Acquisition",
            FlowMember::Disposal => "F_Disposal",
            FlowMember::Closing => "F_Closing",
            FlowMember::Total => "F_Total",
            FlowMember::ManualJe => "F_ManualJE",
        }
    }

    pub fn from_member(s: &str) -> Option<FlowMember> {
        match s {
            "F_None" => Some(FlowMember::None),
            "F_Opening" => Some(FlowMember::Opening),
            "F_Movement" => Some(FlowMember::Movement),
            "F_FXImpact" => Some(FlowMember::FxImpact),
            "F_Elimination" => Some(FlowMember::Elimination),
            "F_Acquisition" => Some(FlowMember::Acquisition),
            "F_Disposal" => Some(FlowMember::Disposal),
            "F_Closing" => Some(FlowMember::Closing),
            "F_Total" => Some(FlowMember::Total),
            "F_ManualJE" => Some(FlowMember::ManualJe),
            _ => None,
        }
    }
}

/// One fully-addressed intersection of the cube.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PovKey {
    pub entity: EntityId,
    pub account: AccountId,
    pub view: ConsolidationView,
    pub flow: FlowMember,
    /// Data origin: "None" for calculated data, a journal id for JE postings,
    /// a source entity for elimination legs.
    pub origin: String,
    /// Intercompany counterparty, where the amount is IC-tagged.
    pub ic_partner: Option<EntityId>,
    pub period: Period,
    pub scenario: String,
    /// Up to six user-defined axes; unset axes are omitted on the wire.
    pub user_defined: [Option<String>; 6],
}

impl PovKey {
    /// Shorthand for the common calculated-data intersection: `F_None` flow,
    /// no origin, no IC partner.
    pub fn cell(
        entity: &EntityId,
        account: &AccountId,
        view: ConsolidationView,
        period: Period,
        scenario: &str,
    ) -> PovKey {
        PovKey {
            entity: entity.clone(),
            account: account.clone(),
            view,
            flow: FlowMember::None,
            origin: "None".to_string(),
            ic_partner: None,
            period,
            scenario: scenario.to_string(),
            user_defined: Default::default(),
        }
    }

    pub fn with_flow(mut self, flow: FlowMember) -> PovKey {
        self.flow = flow;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> PovKey {
        self.origin = origin.into();
        self
    }

    pub fn with_ic_partner(mut self, partner: &EntityId) -> PovKey {
        self.ic_partner = Some(partner.clone());
        self
    }
}

impl fmt::Display for PovKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E#{}:A#{}:C#{}:F#{}:O#{}:I#{}:T#{}",
            self.entity,
            self.account,
            self.view.member(),
            self.flow.member(),
            self.origin,
            self.ic_partner
                .as_ref()
                .map(|e| e.0.as_str())
                .unwrap_or("None"),
            self.period,
        )?;
        for (i, ud) in self.user_defined.iter().enumerate() {
            if let Some(value) = ud {
                write!(f, ":UD{}#{}", i + 1, value)?;
            }
        }
        write!(f, ":S#{}", self.scenario)
    }
}

impl FromStr for PovKey {
    type Err = ConsolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut builder = PovBuilder::default();
        for token in s.split(':') {
            let (axis, member) = token.split_once('#').ok_or_else(|| ConsolError::PovParse {
                token: token.to_string(),
                reason: "Expected 'Axis#Member'".into(),
            })?;
            let parse_err = |reason: String| ConsolError::PovParse {
                token: token.to_string(),
                reason,
            };
            match axis {
                "E" => builder = builder.entity(EntityId(member.to_string())),
                "A" => builder = builder.account(AccountId(member.to_string())),
                "C" => {
                    let view = ConsolidationView::from_member(member)
                        .ok_or_else(|| parse_err(format!("Unknown view member '{member}'")))?;
                    builder = builder.view(view);
                }
                "F" => {
                    let flow = FlowMember::from_member(member)
                        .ok_or_else(|| parse_err(format!("Unknown flow member '{member}'")))?;
                    builder = builder.flow(flow);
                }
                "O" => builder = builder.origin(member),
                "I" => {
                    if member != "None" {
                        builder = builder.ic_partner(EntityId(member.to_string()));
                    }
                }
                "T" => {
                    let period: Period = member
                        .parse()
                        .map_err(|_| parse_err(format!("Bad period '{member}'")))?;
                    builder = builder.period(period);
                }
                "S" => builder = builder.scenario(member),
                ud if ud.starts_with("UD") => {
                    let index: usize = ud[2..]
                        .parse()
                        .map_err(|_| parse_err(format!("Bad user axis '{ud}'")))?;
                    if !(1..=6).contains(&index) {
                        return Err(parse_err(format!("User axis out of range '{ud}'")));
                    }
                    builder = builder.user_defined(index, member);
                }
                other => return Err(parse_err(format!("Unknown axis '{other}'"))),
            }
        }
        builder.build()
    }
}

/// Builder validating that every required axis resolves to a member.
#[derive(Debug, Default, Clone)]
pub struct PovBuilder {
    entity: Option<EntityId>,
    account: Option<AccountId>,
    view: Option<ConsolidationView>,
    flow: Option<FlowMember>,
    origin: Option<String>,
    ic_partner: Option<EntityId>,
    period: Option<Period>,
    scenario: Option<String>,
    user_defined: [Option<String>; 6],
}

impl PovBuilder {
    pub fn new() -> PovBuilder {
        PovBuilder::default()
    }

    pub fn entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    pub fn view(mut self, view: ConsolidationView) -> Self {
        self.view = Some(view);
        self
    }

    pub fn flow(mut self, flow: FlowMember) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn ic_partner(mut self, partner: EntityId) -> Self {
        self.ic_partner = Some(partner);
        self
    }

    pub fn period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    /// Set user axis `index` (1-based, 1..=6).
    pub fn user_defined(mut self, index: usize, value: impl Into<String>) -> Self {
        if (1..=6).contains(&index) {
            self.user_defined[index - 1] = Some(value.into());
        }
        self
    }

    pub fn build(self) -> ConsolResult<PovKey> {
        let missing = |axis: &str| ConsolError::PovParse {
            token: axis.to_string(),
            reason: format!("Required axis '{axis}' did not resolve to a member"),
        };
        Ok(PovKey {
            entity: self.entity.ok_or_else(|| missing("E"))?,
            account: self.account.ok_or_else(|| missing("A"))?,
            view: self.view.ok_or_else(|| missing("C"))?,
            flow: self.flow.unwrap_or(FlowMember::None),
            origin: self.origin.unwrap_or_else(|| "None".to_string()),
            ic_partner: self.ic_partner,
            period: self.period.ok_or_else(|| missing("T"))?,
            scenario: self.scenario.ok_or_else(|| missing("S"))?,
            user_defined: self.user_defined,
        })
    }
}
