use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::{
    net::IpAddr,
    sync::{Arc, Weak},
};
use thiserror::Error;
use tracing::debug;

use pfcp_wire::{
    rules::{self, Far, FarId, FarUpdate, Pdr, PdrId, PdrUpdate, RuleError},
    Body, Cause, FSeid, Ie, IeError, IeType, MessageType, SessionEstablishmentRequest,
    SessionModificationRequest,
};

use crate::{Association, Function, RequestError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session already established")]
    AlreadyEstablished,
    #[error("Session not established")]
    NotEstablished,
    #[error("F-SEID not set")]
    FSeidUnset,
    #[error("F-SEID carries no IP address")]
    NoAddress,
    #[error("PDR {0} already exists")]
    PdrExists(PdrId),
    #[error("FAR {0} already exists")]
    FarExists(FarId),
    #[error("PDR {0} not found")]
    PdrNotFound(PdrId),
    #[error("FAR {0} not found")]
    FarNotFound(FarId),
    #[error("PDR {pdr} references missing FAR {far}")]
    DanglingFarReference { pdr: PdrId, far: FarId },
    #[error("Association dropped")]
    AssociationGone,
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
    #[error("Unexpected response type {0}")]
    UnexpectedResponse(MessageType),
    #[error("Peer rejected the request: {0:?}")]
    Rejected(Cause),
    #[error("Missing IE {0}")]
    MissingIe(IeType),
    #[error("Information element error: {0}")]
    Ie(#[from] IeError),
}

/// One rule transaction: rules to create and rules to update, applied as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleChanges {
    pub create_pdrs: Vec<Pdr>,
    pub create_fars: Vec<Far>,
    pub update_pdrs: Vec<PdrUpdate>,
    pub update_fars: Vec<FarUpdate>,
}

impl RuleChanges {
    pub fn create(pdrs: Vec<Pdr>, fars: Vec<Far>) -> Self {
        Self { create_pdrs: pdrs, create_fars: fars, ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.create_pdrs.is_empty()
            && self.create_fars.is_empty()
            && self.update_pdrs.is_empty()
            && self.update_fars.is_empty()
    }

    pub(crate) fn from_modification(req: &SessionModificationRequest) -> Result<Self, RuleError> {
        Ok(Self {
            create_pdrs: rules::parse_create_pdrs(&req.create_pdr)?,
            create_fars: rules::parse_create_fars(&req.create_far)?,
            update_pdrs: rules::parse_update_pdrs(&req.update_pdr)?,
            update_fars: rules::parse_update_fars(&req.update_far)?,
        })
    }

    fn to_modification(&self) -> SessionModificationRequest {
        SessionModificationRequest {
            create_pdr: self.create_pdrs.iter().map(Pdr::to_create_ie).collect(),
            create_far: self.create_fars.iter().map(Far::to_create_ie).collect(),
            update_pdr: self.update_pdrs.iter().map(PdrUpdate::to_update_ie).collect(),
            update_far: self.update_fars.iter().map(FarUpdate::to_update_ie).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct RuleState {
    established: bool,
    remote: Option<FSeid>,
    pdrs: FxHashMap<PdrId, Pdr>,
    /// The PDRs of `pdrs`, sorted by ascending precedence. Replaced wholesale on every commit so
    /// readers holding a previous snapshot never see a partially sorted sequence.
    by_precedence: Arc<[Pdr]>,
    fars: FxHashMap<FarId, Far>,
    generation: u64,
}

/// The rule tables a transaction would produce.
struct Staged {
    pdrs: FxHashMap<PdrId, Pdr>,
    fars: FxHashMap<FarId, Far>,
}

impl RuleState {
    fn new(remote: Option<FSeid>) -> Self {
        Self {
            established: false,
            remote,
            pdrs: FxHashMap::default(),
            by_precedence: Arc::from(Vec::new()),
            fars: FxHashMap::default(),
            generation: 0,
        }
    }

    /// Computes the outcome of `changes` without touching the current state.
    fn stage(&self, changes: &RuleChanges) -> Result<Staged, SessionError> {
        let mut pdrs = self.pdrs.clone();
        let mut fars = self.fars.clone();

        for pdr in &changes.create_pdrs {
            if pdrs.insert(pdr.id, pdr.clone()).is_some() {
                return Err(SessionError::PdrExists(pdr.id));
            }
        }
        for far in &changes.create_fars {
            if fars.insert(far.id, far.clone()).is_some() {
                return Err(SessionError::FarExists(far.id));
            }
        }

        // Updates to unknown rules create them when they carry every mandatory field.
        for update in &changes.update_pdrs {
            let pdr = match pdrs.get(&update.id) {
                Some(current) => update.apply_to(current),
                None => update.to_pdr().ok_or(SessionError::PdrNotFound(update.id))?,
            };
            pdrs.insert(update.id, pdr);
        }
        for update in &changes.update_fars {
            let far = match fars.get(&update.id) {
                Some(current) => update.apply_to(current),
                None => update.to_far().ok_or(SessionError::FarNotFound(update.id))?,
            };
            fars.insert(update.id, far);
        }

        for pdr in pdrs.values() {
            if let Some(far) = pdr.far_id.filter(|far| !fars.contains_key(far)) {
                return Err(SessionError::DanglingFarReference { pdr: pdr.id, far });
            }
        }

        Ok(Staged { pdrs, fars })
    }

    fn commit(&mut self, staged: Staged) {
        let mut sorted: Vec<Pdr> = staged.pdrs.values().cloned().collect();
        sorted.sort_by_key(Pdr::precedence_key);

        self.by_precedence = sorted.into();
        self.pdrs = staged.pdrs;
        self.fars = staged.fars;
    }
}

/// A PFCP session: one forwarding context and its rules.
#[derive(Debug)]
pub struct Session {
    association: Weak<Association>,
    /// Never changes once the session exists.
    local: FSeid,
    state: RwLock<RuleState>,
}

impl Session {
    /// Creates a session that is not yet established. Fails if the initial rules collide or a
    /// PDR references a FAR that is not part of them.
    pub(crate) fn new(
        association: Weak<Association>,
        local: FSeid,
        remote: Option<FSeid>,
        pdrs: Vec<Pdr>,
        fars: Vec<Far>,
    ) -> Result<Self, SessionError> {
        let mut state = RuleState::new(remote);
        let staged = state.stage(&RuleChanges::create(pdrs, fars))?;
        state.commit(staged);

        Ok(Self { association, local, state: RwLock::new(state) })
    }

    /// Runs the session establishment procedure.
    ///
    /// On a user plane function the establishment request has already been received, so the
    /// session is only marked established. On a control plane function a Session
    /// Establishment Request carrying every rule is sent to the peer, and the user plane
    /// F-SEID from its response becomes the remote F-SEID.
    pub async fn setup(&self) -> Result<(), SessionError> {
        if self.is_established() {
            return Err(SessionError::AlreadyEstablished);
        }
        let association = self.association().ok_or(SessionError::AssociationGone)?;
        let entity = association.entity().map_err(|_| SessionError::AssociationGone)?;

        match entity.function() {
            Function::UserPlane => {
                let mut state = self.state.write();
                if state.established {
                    return Err(SessionError::AlreadyEstablished);
                }
                state.established = true;
            }
            Function::ControlPlane => {
                let request = {
                    let state = self.state.read();
                    let mut fars: Vec<&Far> = state.fars.values().collect();
                    fars.sort_by_key(|far| far.id);

                    SessionEstablishmentRequest {
                        node_id: Some(Ie::new_node_id(entity.node_id())?),
                        cp_f_seid: Some(Ie::new_f_seid(&self.local)),
                        create_pdr: state.by_precedence.iter().map(Pdr::to_create_ie).collect(),
                        create_far: fars.into_iter().map(Far::to_create_ie).collect(),
                        additional: Vec::new(),
                    }
                };

                let response = entity.request(association.peer_addr(), Some(0), request).await?;
                let msg_type = response.message_type();
                let Body::SessionEstablishmentResponse(response) = response.into_body() else {
                    return Err(SessionError::UnexpectedResponse(msg_type));
                };
                check_cause(response.cause.as_ref())?;
                let remote = response
                    .up_f_seid
                    .as_ref()
                    .ok_or(SessionError::MissingIe(IeType::F_SEID))?
                    .f_seid()?;

                let mut state = self.state.write();
                if state.established {
                    return Err(SessionError::AlreadyEstablished);
                }
                state.remote = Some(remote);
                state.established = true;
            }
        }

        debug!(seid = self.local.seid, "Session established");
        Ok(())
    }

    /// Applies one rule transaction atomically and returns the new generation.
    ///
    /// Created rules must not exist yet, updates merge into existing rules, and every PDR must
    /// reference a FAR of the resulting rule set. On error nothing changes.
    pub fn add_update_rules(&self, changes: RuleChanges) -> Result<u64, SessionError> {
        let mut state = self.state.write();
        if !state.established {
            return Err(SessionError::NotEstablished);
        }

        let staged = state.stage(&changes)?;
        state.commit(staged);
        state.generation += 1;
        Ok(state.generation)
    }

    /// Runs the session modification procedure towards the peer, then applies the same
    /// transaction locally once the peer accepted it.
    pub async fn modify(&self, changes: RuleChanges) -> Result<u64, SessionError> {
        {
            let state = self.state.read();
            if !state.established {
                return Err(SessionError::NotEstablished);
            }
            state.stage(&changes)?;
        }

        let association = self.association().ok_or(SessionError::AssociationGone)?;
        let entity = association.entity().map_err(|_| SessionError::AssociationGone)?;
        let remote_seid = self.remote_seid()?;

        let request = changes.to_modification();
        let response =
            entity.request(association.peer_addr(), Some(remote_seid), request).await?;
        let msg_type = response.message_type();
        let Body::SessionModificationResponse(response) = response.into_body() else {
            return Err(SessionError::UnexpectedResponse(msg_type));
        };
        check_cause(response.cause.as_ref())?;

        self.add_update_rules(changes)
    }

    /// Replaces the address of the remote F-SEID. The remote SEID is kept.
    pub fn update_remote_address(&self, f_seid: &FSeid) -> Result<(), SessionError> {
        if f_seid.ip().is_none() {
            return Err(SessionError::NoAddress);
        }

        let mut state = self.state.write();
        let remote = state.remote.as_mut().ok_or(SessionError::FSeidUnset)?;
        remote.ipv4 = f_seid.ipv4;
        remote.ipv6 = f_seid.ipv6;
        Ok(())
    }

    /// Marks the session as no longer established. Further transactions fail.
    pub(crate) fn invalidate(&self) {
        self.state.write().established = false;
    }

    /// Returns the PDRs in matching order: check from the first element and stop at the first
    /// match.
    pub fn pdrs_by_precedence(&self) -> Arc<[Pdr]> {
        Arc::clone(&self.state.read().by_precedence)
    }

    pub fn pdr(&self, id: PdrId) -> Result<Pdr, SessionError> {
        self.state.read().pdrs.get(&id).cloned().ok_or(SessionError::PdrNotFound(id))
    }

    pub fn far(&self, id: FarId) -> Result<Far, SessionError> {
        self.state.read().fars.get(&id).cloned().ok_or(SessionError::FarNotFound(id))
    }

    pub fn is_established(&self) -> bool {
        self.state.read().established
    }

    /// Number of rule transactions applied since establishment.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn association(&self) -> Option<Arc<Association>> {
        self.association.upgrade()
    }

    pub fn local_f_seid(&self) -> Result<FSeid, SessionError> {
        with_address(Some(self.local))
    }

    pub fn local_seid(&self) -> Result<u64, SessionError> {
        self.local_f_seid().map(|f| f.seid)
    }

    pub fn local_addr(&self) -> Result<IpAddr, SessionError> {
        address(Some(self.local))
    }

    pub fn remote_f_seid(&self) -> Result<FSeid, SessionError> {
        with_address(self.state.read().remote)
    }

    pub fn remote_seid(&self) -> Result<u64, SessionError> {
        self.remote_f_seid().map(|f| f.seid)
    }

    pub fn remote_addr(&self) -> Result<IpAddr, SessionError> {
        address(self.state.read().remote)
    }
}

fn with_address(f_seid: Option<FSeid>) -> Result<FSeid, SessionError> {
    let f_seid = f_seid.ok_or(SessionError::FSeidUnset)?;
    f_seid.ip().ok_or(SessionError::NoAddress)?;
    Ok(f_seid)
}

fn address(f_seid: Option<FSeid>) -> Result<IpAddr, SessionError> {
    f_seid.ok_or(SessionError::FSeidUnset)?.ip().ok_or(SessionError::NoAddress)
}

fn check_cause(cause: Option<&Ie>) -> Result<(), SessionError> {
    let cause = cause.ok_or(SessionError::MissingIe(IeType::CAUSE))?.cause()?;
    if !cause.is_accepted() {
        return Err(SessionError::Rejected(cause));
    }
    Ok(())
}
