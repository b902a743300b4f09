use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::{net::IpAddr, sync::Arc};
use thiserror::Error;

use pfcp_wire::NodeId;

use crate::{Association, Session};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("Association with {0} already exists")]
    AssociationExists(NodeId),
    #[error("No association with {0}")]
    AssociationNotFound(NodeId),
    #[error("Session {seid:#x} at {addr} already exists")]
    SessionExists { addr: IpAddr, seid: u64 },
    #[error("No session {seid:#x} at {addr}")]
    SessionNotFound { addr: IpAddr, seid: u64 },
    #[error("Session has no usable local F-SEID")]
    NoLocalFSeid,
}

/// Associations of an entity, keyed by peer node ID. Read-only outside the crate: an
/// association leaves the table only through [`Association::terminate`].
#[derive(Debug, Default)]
pub struct AssociationTable {
    inner: Mutex<FxHashMap<NodeId, Arc<Association>>>,
}

impl AssociationTable {
    /// Inserts the association built by `make` unless the peer already has one. The existence
    /// check and the insert happen under one lock, and `make` only runs when the insert will
    /// succeed.
    pub(crate) fn insert_with(
        &self,
        node_id: NodeId,
        make: impl FnOnce() -> Arc<Association>,
    ) -> Result<Arc<Association>, TableError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&node_id) {
            return Err(TableError::AssociationExists(node_id));
        }

        let association = make();
        inner.insert(node_id, Arc::clone(&association));
        Ok(association)
    }

    pub fn get(&self, node_id: &NodeId) -> Result<Arc<Association>, TableError> {
        self.inner
            .lock()
            .get(node_id)
            .cloned()
            .ok_or_else(|| TableError::AssociationNotFound(node_id.clone()))
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.inner.lock().contains_key(node_id)
    }

    /// Removes the entry for `node_id` only if it is `association` itself, so that a newer
    /// association with the same peer survives the teardown of an old one.
    pub(crate) fn remove_exact(&self, node_id: &NodeId, association: &Association) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(node_id) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), association) => {
                inner.remove(node_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn values(&self) -> Vec<Arc<Association>> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Established sessions of an entity, indexed by local address and then local SEID, so that a
/// session related message can be routed without walking the associations. Sessions are
/// added and removed by their association only.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: RwLock<FxHashMap<IpAddr, FxHashMap<u64, Arc<Session>>>>,
}

impl SessionTable {
    /// Adds a session under the address and SEID of its local F-SEID.
    pub(crate) fn add(&self, session: Arc<Session>) -> Result<(), TableError> {
        let local = session.local_f_seid().map_err(|_| TableError::NoLocalFSeid)?;
        let addr = local.ip().ok_or(TableError::NoLocalFSeid)?;

        let mut inner = self.inner.write();
        let sessions = inner.entry(addr).or_default();
        if sessions.contains_key(&local.seid) {
            return Err(TableError::SessionExists { addr, seid: local.seid });
        }
        sessions.insert(local.seid, session);
        Ok(())
    }

    pub fn get(&self, addr: IpAddr, seid: u64) -> Result<Arc<Session>, TableError> {
        self.inner
            .read()
            .get(&addr)
            .and_then(|sessions| sessions.get(&seid))
            .cloned()
            .ok_or(TableError::SessionNotFound { addr, seid })
    }

    pub(crate) fn remove(&self, addr: IpAddr, seid: u64) -> Option<Arc<Session>> {
        let mut inner = self.inner.write();
        let sessions = inner.get_mut(&addr)?;
        let session = sessions.remove(&seid);
        if sessions.is_empty() {
            inner.remove(&addr);
        }
        session
    }

    pub fn len(&self) -> usize {
        self.inner.read().values().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
