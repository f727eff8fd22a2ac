use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::candidate::LocalCandidate;
use crate::error::*;
use crate::stream::Component;

/// Callback used by trickling harvests; a final `None` signals that the
/// harvester has nothing more to deliver.
pub type TrickleCallback = Box<dyn Fn(Option<Arc<LocalCandidate>>) + Send + Sync>;

/// A source of local candidates: host interface enumeration, a STUN
/// server round trip, a TURN allocation. The agent only consumes the
/// candidates; how they are obtained stays inside the harvester.
#[async_trait]
pub trait CandidateHarvester {
    /// Gathers the candidates this harvester can produce for `component`.
    async fn harvest(&self, component: &Arc<Component>) -> Result<Vec<Arc<LocalCandidate>>>;

    /// Gathers for several components at once, delivering candidates
    /// through `on_candidate` as they surface.
    async fn harvest_trickle(
        &self,
        components: &[Arc<Component>],
        on_candidate: TrickleCallback,
    ) -> Result<()> {
        for component in components {
            for candidate in self.harvest(component).await? {
                on_candidate(Some(candidate));
            }
        }
        on_candidate(None);
        Ok(())
    }

    /// True for harvesters that enumerate local interfaces.
    fn is_host_harvester(&self) -> bool {
        false
    }
}

/// Installs TURN permissions for relayed candidates. A relayed check must
/// not be sent before the TURN server permits the peer address.
#[async_trait]
pub trait RelayPermission {
    async fn create_permission(&self, peer: SocketAddr) -> Result<()>;
}
