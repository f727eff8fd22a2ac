#[cfg(test)]
mod agent_test;

pub mod agent_config;
pub(crate) mod agent_internal;
pub(crate) mod check_client;
pub mod check_server;
pub(crate) mod keepalive;
pub mod nominator;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use agent_config::AgentConfig;
use agent_internal::AgentInternal;

use crate::candidate::{LocalCandidate, RemoteCandidate};
use crate::error::*;
use crate::events::IceEvent;
use crate::harvest::CandidateHarvester;
use crate::rand::{generate_pwd, generate_tie_breaker, generate_ufrag};
use crate::state::IceProcessingState;
use crate::stream::{Component, IceMediaStream};
use crate::stun_stack::TransactionEvent;
use crate::transport::Transport;
use crate::url::ServerUrl;

pub use check_server::IncomingCheck;

/// The ICE agent: owns the media streams, drives connectivity checks
/// over a consumed STUN transaction engine, and walks the overall
/// processing state machine from Waiting to Terminated.
pub struct Agent {
    pub(crate) internal: Arc<AgentInternal>,
}

impl Agent {
    /// Creates a new agent. Credentials are generated unless provided;
    /// provided ones must carry at least 24 bits (ufrag) and 128 bits
    /// (pwd) of randomness.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let stun_stack = match config.stun_stack.clone() {
            Some(stack) => stack,
            None => return Err(Error::ErrNoStunStack),
        };

        let mut ufrag = config.local_ufrag.clone();
        if ufrag.is_empty() {
            ufrag = generate_ufrag(&config.ufrag_prefix);
        }
        let mut pwd = config.local_pwd.clone();
        if pwd.is_empty() {
            pwd = generate_pwd();
        }

        if ufrag.len() * 8 < 24 {
            return Err(Error::ErrLocalUfragInsufficientBits);
        }
        if pwd.len() * 8 < 128 {
            return Err(Error::ErrLocalPwdInsufficientBits);
        }

        let internal = AgentInternal::new(
            config.settings(),
            stun_stack,
            ufrag,
            pwd,
            config.is_controlling,
            generate_tie_breaker(),
        );

        Ok(Self {
            internal: Arc::new(internal),
        })
    }

    /// Subscribes to the agent's typed event feed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IceEvent> {
        self.internal.event_tx.subscribe()
    }

    /// The sender the STUN stack implementation delivers transaction
    /// outcomes on.
    #[must_use]
    pub fn transaction_event_sender(&self) -> mpsc::Sender<TransactionEvent> {
        self.internal.transaction_tx.clone()
    }

    /// Creates a new media stream. Streams are checked in creation
    /// order; the first one seeds the unfreezing algorithm.
    pub async fn create_stream(&self, name: &str) -> Result<Arc<IceMediaStream>> {
        let mut streams = self.internal.streams.lock().await;
        if streams.iter().any(|s| s.name == name) {
            return Err(Error::ErrStreamAlreadyExists);
        }

        let stream = Arc::new(IceMediaStream::new(name));
        streams.push(Arc::clone(&stream));
        Ok(stream)
    }

    pub async fn stream(&self, name: &str) -> Option<Arc<IceMediaStream>> {
        self.internal.stream(name).await
    }

    pub async fn streams(&self) -> Vec<Arc<IceMediaStream>> {
        self.internal.streams().await
    }

    /// Runs the given harvesters against a component, assigning
    /// foundations and electing the default candidate as candidates
    /// surface. Host harvesters are skipped when host harvesting is
    /// disabled.
    pub async fn gather_candidates(
        &self,
        component: &Arc<Component>,
        harvesters: &[Arc<dyn CandidateHarvester + Send + Sync>],
    ) -> Result<()> {
        for harvester in harvesters {
            if harvester.is_host_harvester() && !self.internal.settings.use_host_harvester {
                continue;
            }

            for candidate in harvester.harvest(component).await? {
                self.internal.foundations.assign_foundation(&candidate);
                component.add_local_candidate(candidate).await;
            }
        }
        Ok(())
    }

    /// Adds a local candidate directly, for callers that harvest
    /// out-of-band (trickle).
    pub async fn add_local_candidate(
        &self,
        component: &Arc<Component>,
        candidate: Arc<LocalCandidate>,
    ) -> bool {
        self.internal.foundations.assign_foundation(&candidate);
        component.add_local_candidate(candidate).await
    }

    /// Adds a remote candidate learned from signaling. RFC 1918 host
    /// remotes are dropped when so configured.
    pub async fn add_remote_candidate(
        &self,
        component: &Arc<Component>,
        candidate: Arc<RemoteCandidate>,
    ) -> bool {
        if self.internal.settings.skip_remote_private_hosts
            && candidate.addr().is_private_host()
        {
            log::debug!(
                "[{}]: skipping private remote candidate {}",
                self.internal.get_name(),
                candidate
            );
            return false;
        }

        component.add_remote_candidate(candidate).await
    }

    /// The local username fragment checks authenticate with.
    #[must_use]
    pub fn local_ufrag(&self) -> &str {
        &self.internal.local_ufrag
    }

    /// The local password peers use to key MESSAGE-INTEGRITY.
    #[must_use]
    pub fn local_pwd(&self) -> &str {
        &self.internal.local_pwd
    }

    #[must_use]
    pub fn is_controlling(&self) -> bool {
        self.internal.is_controlling()
    }

    /// Sets the role before checks start; a role conflict can still flip
    /// it later.
    pub async fn set_controlling(&self, controlling: bool) {
        self.internal.set_controlling(controlling).await;
    }

    #[must_use]
    pub fn tie_breaker(&self) -> u64 {
        self.internal.tie_breaker.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn state(&self) -> IceProcessingState {
        self.internal.state()
    }

    /// The generation of this agent's candidates; incremented when a
    /// fresh session reuses the struct.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.internal.generation.load(Ordering::SeqCst)
    }

    /// The STUN/TURN servers configured for harvesting.
    #[must_use]
    pub fn harvest_urls(&self) -> &[ServerUrl] {
        &self.internal.settings.urls
    }

    /// The advisory priority tweak harvesters apply per transport.
    #[must_use]
    pub fn priority_modifier(&self, transport: Transport) -> u32 {
        self.internal.settings.priority_modifier(transport)
    }

    /// Builds the check lists and starts checking. Legal exactly once,
    /// from the Waiting state.
    pub async fn start_connectivity_establishment(&self) -> Result<()> {
        self.internal.start_connectivity_establishment().await
    }

    /// Feeds one authenticated incoming Binding Request into the check
    /// server.
    pub async fn process_binding_request(&self, incoming: IncomingCheck) {
        check_server::process_binding_request(&self.internal, incoming).await;
    }

    /// Releases the agent: stops every task, cancels outstanding
    /// transactions, closes candidate sockets and terminates. A second
    /// call is a no-op.
    pub async fn free(&self) -> Result<()> {
        self.internal.close().await
    }
}
