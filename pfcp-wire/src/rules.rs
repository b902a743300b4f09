//! Packet detection and forwarding action rules.
//!
//! Only the fields the session layer relies on are decoded: rule identifiers, PDR precedence,
//! the PDR to FAR reference and the FAR apply action. Everything else is carried as raw IEs.

use thiserror::Error;

use crate::{Cause, Ie, IeError, IeType};

pub type PdrId = u16;
pub type FarId = u32;

/// A rule IE that cannot be turned into a rule, with the cause to report to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rule rejected ({cause:?}), offending IE {offending_ie}")]
pub struct RuleError {
    pub cause: Cause,
    pub offending_ie: IeType,
}

impl RuleError {
    fn missing(offending_ie: IeType) -> Self {
        Self { cause: Cause::MandatoryIeMissing, offending_ie }
    }
}

impl From<IeError> for RuleError {
    fn from(err: IeError) -> Self {
        Self { cause: err.cause(), offending_ie: err.ie_type() }
    }
}

/// Apply Action flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ApplyAction(pub u16);

impl ApplyAction {
    pub const DROP: Self = Self(0x0001);
    pub const FORW: Self = Self(0x0002);
    pub const BUFF: Self = Self(0x0004);
    pub const NOCP: Self = Self(0x0008);
    pub const DUPL: Self = Self(0x0010);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_ie(ie: &Ie) -> Result<Self, IeError> {
        if ie.ie_type() != IeType::APPLY_ACTION {
            return Err(IeError::UnexpectedType {
                expected: IeType::APPLY_ACTION,
                found: ie.ie_type(),
            });
        }
        match ie.payload().as_ref() {
            [] => Err(IeError::Truncated(IeType::APPLY_ACTION)),
            [low] => Ok(Self(u16::from(*low))),
            [low, high, ..] => Ok(Self(u16::from(*low) | u16::from(*high) << 8)),
        }
    }

    pub fn to_ie(self) -> Ie {
        let [low, high] = self.0.to_le_bytes();
        if high == 0 {
            Ie::new(IeType::APPLY_ACTION, vec![low])
        } else {
            Ie::new(IeType::APPLY_ACTION, vec![low, high])
        }
    }
}

impl std::ops::BitOr for ApplyAction {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Packet Detection Rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdr {
    pub id: PdrId,
    /// Lower values match first.
    pub precedence: u32,
    pub pdi: Ie,
    pub far_id: Option<FarId>,
    pub outer_header_removal: Option<Ie>,
    pub additional: Vec<Ie>,
}

impl Pdr {
    pub fn new(id: PdrId, precedence: u32, pdi: Ie) -> Self {
        Self { id, precedence, pdi, far_id: None, outer_header_removal: None, additional: Vec::new() }
    }

    pub fn with_far_id(mut self, far_id: FarId) -> Self {
        self.far_id = Some(far_id);
        self
    }

    /// The ordering key used for PDI matching: precedence first, identifier to break ties.
    pub fn precedence_key(&self) -> (u32, PdrId) {
        (self.precedence, self.id)
    }

    /// Parses a Create PDR IE.
    pub fn from_create_ie(ie: &Ie) -> Result<Self, RuleError> {
        let update = PdrUpdate::parse(ie)?;
        let precedence = update.precedence.ok_or(RuleError::missing(IeType::PRECEDENCE))?;
        let pdi = update.pdi.ok_or(RuleError::missing(IeType::PDI))?;

        Ok(Self {
            id: update.id,
            precedence,
            pdi,
            far_id: update.far_id,
            outer_header_removal: update.outer_header_removal,
            additional: update.additional,
        })
    }

    pub fn to_create_ie(&self) -> Ie {
        let mut children = vec![
            Ie::new_pdr_id(self.id),
            Ie::new_precedence(self.precedence),
            self.pdi.clone(),
        ];
        children.extend(self.outer_header_removal.clone());
        children.extend(self.far_id.map(Ie::new_far_id));
        children.extend(self.additional.iter().cloned());
        Ie::new_grouped(IeType::CREATE_PDR, &children)
    }
}

/// Changes carried by an Update PDR IE. Absent fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdrUpdate {
    pub id: PdrId,
    pub precedence: Option<u32>,
    pub pdi: Option<Ie>,
    pub far_id: Option<FarId>,
    pub outer_header_removal: Option<Ie>,
    pub additional: Vec<Ie>,
}

impl PdrUpdate {
    pub fn new(id: PdrId) -> Self {
        Self {
            id,
            precedence: None,
            pdi: None,
            far_id: None,
            outer_header_removal: None,
            additional: Vec::new(),
        }
    }

    /// Parses an Update PDR IE.
    pub fn from_update_ie(ie: &Ie) -> Result<Self, RuleError> {
        Self::parse(ie)
    }

    fn parse(ie: &Ie) -> Result<Self, RuleError> {
        let mut id = None;
        let mut update = Self::new(0);

        for child in ie.children()? {
            match child.ie_type() {
                IeType::PDR_ID => id = Some(child.pdr_id()?),
                IeType::PRECEDENCE => update.precedence = Some(child.precedence()?),
                IeType::FAR_ID => update.far_id = Some(child.far_id()?),
                IeType::PDI => update.pdi = Some(child),
                IeType::OUTER_HEADER_REMOVAL => update.outer_header_removal = Some(child),
                _ => update.additional.push(child),
            }
        }

        update.id = id.ok_or(RuleError::missing(IeType::PDR_ID))?;
        Ok(update)
    }

    /// Applies the update on top of an existing rule.
    pub fn apply_to(&self, current: &Pdr) -> Pdr {
        let mut additional = current.additional.clone();
        additional.extend(self.additional.iter().cloned());
        Pdr {
            id: current.id,
            precedence: self.precedence.unwrap_or(current.precedence),
            pdi: self.pdi.clone().unwrap_or_else(|| current.pdi.clone()),
            far_id: self.far_id.or(current.far_id),
            outer_header_removal: self
                .outer_header_removal
                .clone()
                .or_else(|| current.outer_header_removal.clone()),
            additional,
        }
    }

    /// Builds a complete rule from this update, if it carries every mandatory field.
    pub fn to_pdr(&self) -> Option<Pdr> {
        Some(Pdr {
            id: self.id,
            precedence: self.precedence?,
            pdi: self.pdi.clone()?,
            far_id: self.far_id,
            outer_header_removal: self.outer_header_removal.clone(),
            additional: self.additional.clone(),
        })
    }

    pub fn to_update_ie(&self) -> Ie {
        let mut children = vec![Ie::new_pdr_id(self.id)];
        children.extend(self.outer_header_removal.clone());
        children.extend(self.precedence.map(Ie::new_precedence));
        children.extend(self.pdi.clone());
        children.extend(self.far_id.map(Ie::new_far_id));
        children.extend(self.additional.iter().cloned());
        Ie::new_grouped(IeType::UPDATE_PDR, &children)
    }
}

/// Forwarding Action Rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Far {
    pub id: FarId,
    pub apply_action: ApplyAction,
    pub forwarding_parameters: Option<Ie>,
    pub additional: Vec<Ie>,
}

impl Far {
    pub fn new(id: FarId, apply_action: ApplyAction) -> Self {
        Self { id, apply_action, forwarding_parameters: None, additional: Vec::new() }
    }

    /// Parses a Create FAR IE.
    pub fn from_create_ie(ie: &Ie) -> Result<Self, RuleError> {
        let update = FarUpdate::parse(ie, IeType::FORWARDING_PARAMETERS)?;
        let apply_action = update.apply_action.ok_or(RuleError::missing(IeType::APPLY_ACTION))?;

        Ok(Self {
            id: update.id,
            apply_action,
            forwarding_parameters: update.forwarding_parameters,
            additional: update.additional,
        })
    }

    pub fn to_create_ie(&self) -> Ie {
        let mut children = vec![Ie::new_far_id(self.id), self.apply_action.to_ie()];
        children.extend(self.forwarding_parameters.clone());
        children.extend(self.additional.iter().cloned());
        Ie::new_grouped(IeType::CREATE_FAR, &children)
    }
}

/// Changes carried by an Update FAR IE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarUpdate {
    pub id: FarId,
    pub apply_action: Option<ApplyAction>,
    /// Stored as Forwarding Parameters so it can replace the current value directly.
    pub forwarding_parameters: Option<Ie>,
    pub additional: Vec<Ie>,
}

impl FarUpdate {
    pub fn new(id: FarId) -> Self {
        Self { id, apply_action: None, forwarding_parameters: None, additional: Vec::new() }
    }

    /// Parses an Update FAR IE.
    pub fn from_update_ie(ie: &Ie) -> Result<Self, RuleError> {
        Self::parse(ie, IeType::UPDATE_FORWARDING_PARAMETERS)
    }

    fn parse(ie: &Ie, parameters_type: IeType) -> Result<Self, RuleError> {
        let mut id = None;
        let mut update = Self::new(0);

        for child in ie.children()? {
            match child.ie_type() {
                IeType::FAR_ID => id = Some(child.far_id()?),
                IeType::APPLY_ACTION => update.apply_action = Some(ApplyAction::from_ie(&child)?),
                t if t == parameters_type => {
                    update.forwarding_parameters =
                        Some(Ie::new(IeType::FORWARDING_PARAMETERS, child.payload().clone()));
                }
                _ => update.additional.push(child),
            }
        }

        update.id = id.ok_or(RuleError::missing(IeType::FAR_ID))?;
        Ok(update)
    }

    pub fn apply_to(&self, current: &Far) -> Far {
        let mut additional = current.additional.clone();
        additional.extend(self.additional.iter().cloned());
        Far {
            id: current.id,
            apply_action: self.apply_action.unwrap_or(current.apply_action),
            forwarding_parameters: self
                .forwarding_parameters
                .clone()
                .or_else(|| current.forwarding_parameters.clone()),
            additional,
        }
    }

    pub fn to_far(&self) -> Option<Far> {
        Some(Far {
            id: self.id,
            apply_action: self.apply_action?,
            forwarding_parameters: self.forwarding_parameters.clone(),
            additional: self.additional.clone(),
        })
    }

    pub fn to_update_ie(&self) -> Ie {
        let mut children = vec![Ie::new_far_id(self.id)];
        children.extend(self.apply_action.map(ApplyAction::to_ie));
        children.extend(
            self.forwarding_parameters
                .as_ref()
                .map(|p| Ie::new(IeType::UPDATE_FORWARDING_PARAMETERS, p.payload().clone())),
        );
        children.extend(self.additional.iter().cloned());
        Ie::new_grouped(IeType::UPDATE_FAR, &children)
    }
}

pub fn parse_create_pdrs(ies: &[Ie]) -> Result<Vec<Pdr>, RuleError> {
    ies.iter().map(Pdr::from_create_ie).collect()
}

pub fn parse_create_fars(ies: &[Ie]) -> Result<Vec<Far>, RuleError> {
    ies.iter().map(Far::from_create_ie).collect()
}

pub fn parse_update_pdrs(ies: &[Ie]) -> Result<Vec<PdrUpdate>, RuleError> {
    ies.iter().map(PdrUpdate::from_update_ie).collect()
}

pub fn parse_update_fars(ies: &[Ie]) -> Result<Vec<FarUpdate>, RuleError> {
    ies.iter().map(FarUpdate::from_update_ie).collect()
}
