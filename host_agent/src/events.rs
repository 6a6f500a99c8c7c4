//! Lifecycle and relation events the agent reacts to.

use core::{fmt, str::FromStr};

use thiserror::Error as ThisError;
use wsgi_provision_common::DatabaseKind;

use crate::state::RelationAttributes;

/// Name of the relation over which downstream consumers receive the service port.
pub const CONSUMER_RELATION: &str = "consumer";

/// What happened on a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationPhase {
    Joined,
    Changed,
    /// Consumer-side only: the consumer is ready to receive data.
    Available,
    Broken,
    Departed,
}

impl RelationPhase {
    const ALL: [Self; 5] = [
        Self::Joined,
        Self::Changed,
        Self::Available,
        Self::Broken,
        Self::Departed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Changed => "changed",
            Self::Available => "available",
            Self::Broken => "broken",
            Self::Departed => "departed",
        }
    }

    /// Whether the remote side goes away with this event.
    #[must_use]
    pub const fn is_detaching(self) -> bool {
        matches!(self, Self::Broken | Self::Departed)
    }
}

/// The kind of event, as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Upgrade,
    ConfigChanged,
    SourceAvailable,
    Database(DatabaseKind, RelationPhase),
    Consumer(RelationPhase),
}

/// Groups event kinds that share their hook handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Install,
    Upgrade,
    ConfigChanged,
    SourceAvailable,
    DatabaseRelation,
    ConsumerRelation,
}

impl EventKind {
    #[must_use]
    pub const fn hook(self) -> Hook {
        match self {
            Self::Install => Hook::Install,
            Self::Upgrade => Hook::Upgrade,
            Self::ConfigChanged => Hook::ConfigChanged,
            Self::SourceAvailable => Hook::SourceAvailable,
            Self::Database(..) => Hook::DatabaseRelation,
            Self::Consumer(_) => Hook::ConsumerRelation,
        }
    }

    /// Relation name for relation events.
    #[must_use]
    pub const fn relation_name(self) -> Option<&'static str> {
        match self {
            Self::Database(kind, _) => Some(kind.relation_name()),
            Self::Consumer(_) => Some(CONSUMER_RELATION),
            Self::Install | Self::Upgrade | Self::ConfigChanged | Self::SourceAvailable => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Install => f.write_str("install"),
            Self::Upgrade => f.write_str("upgrade"),
            Self::ConfigChanged => f.write_str("config-changed"),
            Self::SourceAvailable => f.write_str("source-available"),
            Self::Database(kind, phase) => write!(f, "{kind}-relation-{}", phase.as_str()),
            Self::Consumer(phase) => write!(f, "{CONSUMER_RELATION}-relation-{}", phase.as_str()),
        }
    }
}

/// The event identifier is not one the agent handles.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("Unknown event {0:?}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownEvent(s.to_owned());
        match s {
            "install" => return Ok(Self::Install),
            "upgrade" | "upgrade-charm" => return Ok(Self::Upgrade),
            "config-changed" => return Ok(Self::ConfigChanged),
            "source-available" => return Ok(Self::SourceAvailable),
            _ => {}
        }

        let (relation, phase) = s.split_once("-relation-").ok_or_else(unknown)?;
        let phase = RelationPhase::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == phase)
            .ok_or_else(unknown)?;

        if relation == CONSUMER_RELATION {
            return Ok(Self::Consumer(phase));
        }
        let kind = relation.parse::<DatabaseKind>().map_err(|_| unknown())?;
        if phase == RelationPhase::Available {
            return Err(unknown());
        }
        Ok(Self::Database(kind, phase))
    }
}

/// A single event together with its relation payload, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Identifies the remote side for relation events, e.g. `postgres:0`.
    pub relation_id: String,
    /// Attributes the remote side published.
    pub attributes: RelationAttributes,
}

impl Event {
    /// An event without relation data; relation events get the id `<relation>:0`.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            relation_id: kind
                .relation_name()
                .map(|name| format!("{name}:0"))
                .unwrap_or_default(),
            attributes: RelationAttributes::new(),
        }
    }

    #[must_use]
    pub fn with_relation(
        mut self,
        relation_id: Option<String>,
        attributes: RelationAttributes,
    ) -> Self {
        if let Some(relation_id) = relation_id {
            self.relation_id = relation_id;
        }
        self.attributes = attributes;
        self
    }
}
