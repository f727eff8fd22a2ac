#[cfg(test)]
mod stream_test;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::sync::Mutex;
use util::sync::Mutex as SyncMutex;

use crate::candidate::{CandidatePair, LocalCandidate, RemoteCandidate};
use crate::checklist::CheckList;
use crate::error::*;
use crate::transport::TransportAddress;

/// Chooses which pairs a component keeps alive after completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum KeepAliveStrategy {
    /// Only the selected pair, the default.
    #[serde(rename = "selected-only")]
    SelectedOnly,
    /// The selected pair plus every succeeded TCP pair.
    #[serde(rename = "selected-and-tcp")]
    SelectedAndTcp,
    /// Every succeeded pair.
    #[serde(rename = "all-succeeded")]
    AllSucceeded,
}

impl Default for KeepAliveStrategy {
    fn default() -> Self {
        Self::SelectedOnly
    }
}

/// One flow of a media stream (RTP and RTCP by convention). Owns the
/// component's candidates; pairs only borrow them.
pub struct Component {
    pub id: u16,
    pub stream_name: String,

    // Sorted by the local-candidate comparator, highest first.
    local_candidates: Mutex<Vec<Arc<LocalCandidate>>>,
    remote_candidates: Mutex<Vec<Arc<RemoteCandidate>>>,

    default_local: ArcSwapOption<LocalCandidate>,
    selected_pair: ArcSwapOption<CandidatePair>,
    keepalive_pairs: Mutex<Vec<Arc<CandidatePair>>>,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stream_name, self.id)
    }
}

impl Component {
    pub(crate) fn new(stream_name: String, id: u16) -> Self {
        Self {
            id,
            stream_name,
            local_candidates: Mutex::new(vec![]),
            remote_candidates: Mutex::new(vec![]),
            default_local: ArcSwapOption::empty(),
            selected_pair: ArcSwapOption::empty(),
            keepalive_pairs: Mutex::new(vec![]),
        }
    }

    /// Adds a local candidate, keeping the set ordered and the default
    /// candidate current. Duplicates are dropped.
    pub async fn add_local_candidate(&self, c: Arc<LocalCandidate>) -> bool {
        {
            let mut local_candidates = self.local_candidates.lock().await;
            if local_candidates.iter().any(|e| e.equal(&c)) {
                return false;
            }

            let at = local_candidates
                .iter()
                .position(|e| compare_locals(&c, e) == CmpOrdering::Less)
                .unwrap_or(local_candidates.len());
            local_candidates.insert(at, Arc::clone(&c));
        }

        self.update_default_local().await;
        true
    }

    pub async fn local_candidates(&self) -> Vec<Arc<LocalCandidate>> {
        self.local_candidates.lock().await.clone()
    }

    /// Adds a remote candidate unless an equal one is already known.
    pub async fn add_remote_candidate(&self, c: Arc<RemoteCandidate>) -> bool {
        let mut remote_candidates = self.remote_candidates.lock().await;
        if remote_candidates.iter().any(|e| e.equal(&c)) {
            return false;
        }
        remote_candidates.push(c);
        true
    }

    pub async fn remote_candidates(&self) -> Vec<Arc<RemoteCandidate>> {
        self.remote_candidates.lock().await.clone()
    }

    pub async fn find_local_candidate(
        &self,
        addr: TransportAddress,
    ) -> Option<Arc<LocalCandidate>> {
        let local_candidates = self.local_candidates.lock().await;
        local_candidates.iter().find(|c| c.addr() == addr).cloned()
    }

    pub async fn find_remote_candidate(
        &self,
        addr: TransportAddress,
    ) -> Option<Arc<RemoteCandidate>> {
        let remote_candidates = self.remote_candidates.lock().await;
        remote_candidates.iter().find(|c| c.addr() == addr).cloned()
    }

    /// The remote host candidate whose ufrag names the peer, used when a
    /// peer-reflexive remote inherits credentials.
    pub(crate) async fn any_remote_ufrag(&self) -> Option<String> {
        let remote_candidates = self.remote_candidates.lock().await;
        remote_candidates
            .iter()
            .find(|c| !c.data.ufrag.is_empty())
            .map(|c| c.data.ufrag.clone())
    }

    /// The candidate advertised as this component's default destination.
    #[must_use]
    pub fn default_local_candidate(&self) -> Option<Arc<LocalCandidate>> {
        self.default_local.load_full()
    }

    #[must_use]
    pub fn selected_pair(&self) -> Option<Arc<CandidatePair>> {
        self.selected_pair.load_full()
    }

    pub(crate) fn set_selected_pair(&self, pair: Arc<CandidatePair>) {
        self.selected_pair.store(Some(pair));
    }

    pub(crate) async fn keepalive_pairs(&self) -> Vec<Arc<CandidatePair>> {
        self.keepalive_pairs.lock().await.clone()
    }

    /// Repopulates the keep-alive set from the component's pairs per the
    /// configured strategy.
    pub(crate) async fn update_keepalive_pairs(
        &self,
        strategy: KeepAliveStrategy,
        succeeded: &[Arc<CandidatePair>],
    ) {
        let mut keepalive = self.keepalive_pairs.lock().await;
        keepalive.clear();

        if let Some(selected) = self.selected_pair.load_full() {
            keepalive.push(selected);
        }

        for pair in succeeded {
            if pair.local.data.component_id != self.id {
                continue;
            }
            let wanted = match strategy {
                KeepAliveStrategy::SelectedOnly => false,
                KeepAliveStrategy::SelectedAndTcp => {
                    pair.local.data.transport().is_tcp_based()
                }
                KeepAliveStrategy::AllSucceeded => true,
            };
            if wanted && !keepalive.iter().any(|p| Arc::ptr_eq(p, pair)) {
                keepalive.push(Arc::clone(pair));
            }
        }
    }

    async fn update_default_local(&self) {
        let local_candidates = self.local_candidates.lock().await;
        let best = local_candidates
            .iter()
            .max_by_key(|c| c.default_preference())
            .cloned();
        self.default_local.store(best);
    }

    /// Releases every local candidate socket.
    pub(crate) async fn close(&self) {
        let local_candidates = {
            let mut locals = self.local_candidates.lock().await;
            std::mem::take(&mut *locals)
        };

        for c in local_candidates {
            if let Err(err) = c.close().await {
                log::warn!("[{}]: failed to close candidate {}: {}", self, c, err);
            }
        }
    }
}

/// The strict local-candidate ordering: lower component first, then
/// higher priority, then higher default preference.
fn compare_locals(a: &Arc<LocalCandidate>, b: &Arc<LocalCandidate>) -> CmpOrdering {
    a.data
        .component_id
        .cmp(&b.data.component_id)
        .then(b.priority().cmp(&a.priority()))
        .then(b.default_preference().cmp(&a.default_preference()))
}

/// A named collection of components sharing one check list, remote
/// credentials and a valid list.
pub struct IceMediaStream {
    pub name: String,

    components: Mutex<BTreeMap<u16, Arc<Component>>>,
    check_list: Arc<CheckList>,
    remote_ufrag: SyncMutex<String>,
    remote_pwd: SyncMutex<String>,
    valid_list: Mutex<Vec<Arc<CandidatePair>>>,
}

impl fmt::Display for IceMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream {}", self.name)
    }
}

impl IceMediaStream {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Mutex::new(BTreeMap::new()),
            check_list: Arc::new(CheckList::new(name.to_owned())),
            remote_ufrag: SyncMutex::new(String::new()),
            remote_pwd: SyncMutex::new(String::new()),
            valid_list: Mutex::new(vec![]),
        }
    }

    #[must_use]
    pub fn check_list(&self) -> Arc<CheckList> {
        Arc::clone(&self.check_list)
    }

    /// Creates the component with the given id; ids start at 1.
    pub async fn create_component(&self, id: u16) -> Result<Arc<Component>> {
        if id < 1 {
            return Err(Error::ErrInvalidComponentId);
        }

        let mut components = self.components.lock().await;
        if components.contains_key(&id) {
            return Err(Error::ErrComponentAlreadyExists);
        }

        let component = Arc::new(Component::new(self.name.clone(), id));
        components.insert(id, Arc::clone(&component));
        Ok(component)
    }

    pub async fn component(&self, id: u16) -> Option<Arc<Component>> {
        self.components.lock().await.get(&id).cloned()
    }

    pub async fn components(&self) -> Vec<Arc<Component>> {
        self.components.lock().await.values().cloned().collect()
    }

    pub fn set_remote_credentials(&self, ufrag: &str, pwd: &str) -> Result<()> {
        if ufrag.is_empty() {
            return Err(Error::ErrRemoteUfragEmpty);
        }
        if pwd.is_empty() {
            return Err(Error::ErrRemotePwdEmpty);
        }

        *self.remote_ufrag.lock() = ufrag.to_owned();
        *self.remote_pwd.lock() = pwd.to_owned();
        Ok(())
    }

    #[must_use]
    pub fn remote_ufrag(&self) -> String {
        self.remote_ufrag.lock().clone()
    }

    #[must_use]
    pub fn remote_pwd(&self) -> String {
        self.remote_pwd.lock().clone()
    }

    /// Records a pair that produced a successful check. Marks it valid;
    /// adding the same pair twice leaves a single entry.
    pub(crate) async fn add_to_valid_list(&self, pair: &Arc<CandidatePair>) -> bool {
        pair.mark_valid();

        let mut valid_list = self.valid_list.lock().await;
        if valid_list.iter().any(|p| Arc::ptr_eq(p, pair)) {
            return false;
        }
        valid_list.push(Arc::clone(pair));
        true
    }

    pub async fn valid_list(&self) -> Vec<Arc<CandidatePair>> {
        self.valid_list.lock().await.clone()
    }

    pub(crate) async fn valid_foundations(&self) -> HashSet<String> {
        let valid_list = self.valid_list.lock().await;
        valid_list.iter().map(|p| p.foundation()).collect()
    }

    /// True when every component of the stream has at least one valid
    /// pair.
    pub(crate) async fn valid_covers_components(&self) -> bool {
        let ids: Vec<u16> = {
            let components = self.components.lock().await;
            components.keys().copied().collect()
        };
        let valid_list = self.valid_list.lock().await;

        ids.iter().all(|id| {
            valid_list
                .iter()
                .any(|p| p.local.data.component_id == *id)
        })
    }

    /// True when every component of the stream has a nominated valid
    /// pair, the completion condition.
    pub(crate) async fn nominated_covers_components(&self) -> bool {
        let ids: Vec<u16> = {
            let components = self.components.lock().await;
            components.keys().copied().collect()
        };
        if ids.is_empty() {
            return false;
        }
        let valid_list = self.valid_list.lock().await;

        ids.iter().all(|id| {
            valid_list
                .iter()
                .any(|p| p.local.data.component_id == *id && p.is_nominated())
        })
    }

    /// The component owning the given local transport address, with the
    /// matching candidate.
    pub(crate) async fn find_local(
        &self,
        addr: TransportAddress,
    ) -> Option<(Arc<Component>, Arc<LocalCandidate>)> {
        let components: Vec<Arc<Component>> = {
            let components = self.components.lock().await;
            components.values().cloned().collect()
        };

        for component in components {
            if let Some(candidate) = component.find_local_candidate(addr).await {
                return Some((component, candidate));
            }
        }
        None
    }

    pub(crate) async fn close(&self) {
        for component in self.components().await {
            component.close().await;
        }
    }
}
