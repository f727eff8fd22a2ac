use std::sync::Arc;
use std::time::Duration;

use crate::agent::nominator::NominationStrategy;
use crate::stream::KeepAliveStrategy;
use crate::stun_stack::{RetransmissionPolicy, StunStack};
use crate::transport::Transport;
use crate::url::ServerUrl;

/// The pacing unit between outgoing connectivity checks, RFC 8445 §14.2.
pub(crate) const DEFAULT_TA: Duration = Duration::from_millis(20);

/// Total pairs kept across every stream's check list.
pub(crate) const DEFAULT_MAX_CHECK_LIST_SIZE: usize = 12;

/// How long a completed agent lingers before it terminates.
pub(crate) const DEFAULT_TERMINATION_DELAY: Duration = Duration::from_millis(3000);

/// The window a Pace Maker keeps initiating checks after its first one.
pub(crate) const DEFAULT_CHECK_LIST_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long an ended check list waits for a late success before failing.
pub(crate) const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(3000);

/// The pause between consent-freshness rounds (RFC 7675).
pub(crate) const DEFAULT_CONSENT_INTERVAL: Duration = Duration::from_millis(15000);

pub(crate) const DEFAULT_CONSENT_ORIGINAL_WAIT: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_CONSENT_MAX_WAIT: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_CONSENT_MAX_RETRANSMISSIONS: u16 = 30;

/// How long the nominator holds a validated relay pair hoping a direct
/// path still validates.
pub(crate) const DEFAULT_RELAY_NOMINATION_WAIT: Duration = Duration::from_millis(800);

/// Collects the arguments to `Agent` construction into a single
/// structure, for future-proofness of the interface.
#[derive(Default)]
pub struct AgentConfig {
    /// The transaction engine checks are sent through. Required.
    pub stun_stack: Option<Arc<dyn StunStack + Send + Sync>>,

    /// Local credentials; generated when left empty. The values MUST be
    /// unguessable, with at least 128 bits of random number generator
    /// output used to generate the password, and at least 24 bits of
    /// output to generate the username fragment.
    pub local_ufrag: String,
    pub local_pwd: String,

    /// Prepended to a generated ufrag, handy to tell agents apart in
    /// traces.
    pub ufrag_prefix: String,

    /// The role this agent starts in; a role conflict may flip it.
    pub is_controlling: bool,

    /// Lite agents answer checks but never send them. Accepted but not
    /// elaborated: a lite agent simply never starts Pace Makers.
    pub lite: bool,

    /// How the controlling side picks the pair to nominate.
    pub nomination_strategy: NominationStrategy,

    /// Which pairs keepalives cover once established.
    pub keep_alive_strategy: KeepAliveStrategy,

    /// STUN/TURN servers handed to harvesters.
    pub urls: Vec<ServerUrl>,

    /// Inter-check spacing unit; defaults to 20 ms.
    pub ta: Option<Duration>,

    /// Total pairs across all streams; defaults to 12.
    pub max_check_list_size: Option<usize>,

    /// COMPLETED → TERMINATED wait; defaults to 3 s.
    pub termination_delay: Option<Duration>,

    /// Pace Maker initiation window; defaults to 3 s.
    pub checklist_timeout: Option<Duration>,

    /// Pause between keepalive rounds; defaults to 15 s.
    pub consent_freshness_interval: Option<Duration>,

    /// Per consent check; defaults to 30.
    pub consent_freshness_max_retransmissions: Option<u16>,

    /// Initial RTO for consent checks; defaults to 500 ms.
    pub consent_freshness_original_wait: Option<Duration>,

    /// RTO cap for consent checks; defaults to 500 ms.
    pub consent_freshness_max_wait: Option<Duration>,

    /// Verify consent with acknowledged Binding Requests instead of
    /// fire-and-forget indications.
    pub consent_freshness: bool,

    /// Disables the keepalive task entirely; defaults to true.
    pub no_keepalives: Option<bool>,

    /// Whether dynamic host harvesting runs; defaults to true.
    pub use_host_harvester: Option<bool>,

    /// Lets IPv6 link-local candidates pair with global ones.
    pub allow_link_local_to_global: bool,

    /// FINGERPRINT on every emitted message; defaults to true.
    pub always_sign: Option<bool>,

    /// Advisory additive priority tweaks, non-standard; default 0.
    pub udp_priority_modifier: u32,
    pub tcp_priority_modifier: u32,

    /// Drop RFC 1918 remote host candidates.
    pub skip_remote_private_hosts: bool,

    /// The SOFTWARE attribute value stamped on outgoing messages; unset
    /// means no SOFTWARE attribute.
    pub software: String,
}

/// The resolved knobs an agent runs with.
pub(crate) struct AgentSettings {
    pub(crate) ta: Duration,
    pub(crate) max_check_list_size: usize,
    pub(crate) termination_delay: Duration,
    pub(crate) checklist_timeout: Duration,
    pub(crate) grace_period: Duration,
    pub(crate) consent_interval: Duration,
    pub(crate) consent_policy: RetransmissionPolicy,
    pub(crate) consent_freshness: bool,
    pub(crate) no_keepalives: bool,
    pub(crate) use_host_harvester: bool,
    pub(crate) allow_link_to_global: bool,
    pub(crate) always_sign: bool,
    pub(crate) udp_priority_modifier: u32,
    pub(crate) tcp_priority_modifier: u32,
    pub(crate) skip_remote_private_hosts: bool,
    pub(crate) keep_alive_strategy: KeepAliveStrategy,
    pub(crate) nomination_strategy: NominationStrategy,
    pub(crate) relay_nomination_wait: Duration,
    pub(crate) software: String,
    pub(crate) lite: bool,
    pub(crate) urls: Vec<ServerUrl>,
}

impl AgentSettings {
    pub(crate) fn priority_modifier(&self, transport: Transport) -> u32 {
        match transport {
            Transport::Udp | Transport::Dtls => self.udp_priority_modifier,
            _ => self.tcp_priority_modifier,
        }
    }
}

impl AgentConfig {
    /// Resolves every unset knob to its default.
    pub(crate) fn settings(&self) -> AgentSettings {
        AgentSettings {
            ta: self.ta.unwrap_or(DEFAULT_TA),
            max_check_list_size: self
                .max_check_list_size
                .unwrap_or(DEFAULT_MAX_CHECK_LIST_SIZE),
            termination_delay: self.termination_delay.unwrap_or(DEFAULT_TERMINATION_DELAY),
            checklist_timeout: self.checklist_timeout.unwrap_or(DEFAULT_CHECK_LIST_TIMEOUT),
            grace_period: DEFAULT_GRACE_PERIOD,
            consent_interval: self
                .consent_freshness_interval
                .unwrap_or(DEFAULT_CONSENT_INTERVAL),
            consent_policy: RetransmissionPolicy {
                rto: self
                    .consent_freshness_original_wait
                    .unwrap_or(DEFAULT_CONSENT_ORIGINAL_WAIT),
                max_rto: self
                    .consent_freshness_max_wait
                    .unwrap_or(DEFAULT_CONSENT_MAX_WAIT),
                max_retransmissions: self
                    .consent_freshness_max_retransmissions
                    .unwrap_or(DEFAULT_CONSENT_MAX_RETRANSMISSIONS),
            },
            consent_freshness: self.consent_freshness,
            no_keepalives: self.no_keepalives.unwrap_or(true),
            use_host_harvester: self.use_host_harvester.unwrap_or(true),
            allow_link_to_global: self.allow_link_local_to_global,
            always_sign: self.always_sign.unwrap_or(true),
            udp_priority_modifier: self.udp_priority_modifier,
            tcp_priority_modifier: self.tcp_priority_modifier,
            skip_remote_private_hosts: self.skip_remote_private_hosts,
            keep_alive_strategy: self.keep_alive_strategy,
            nomination_strategy: self.nomination_strategy,
            relay_nomination_wait: DEFAULT_RELAY_NOMINATION_WAIT,
            software: self.software.clone(),
            lite: self.lite,
            urls: self.urls.clone(),
        }
    }
}
