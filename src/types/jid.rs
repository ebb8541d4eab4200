use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const HIDDEN_USER_SERVER: &str = "lid";
pub const HOSTED_SERVER: &str = "hosted";
pub const STATUS_BROADCAST_USER: &str = "status";

/// Destination for control stanzas.
pub const SERVER_JID: &str = "s.whatsapp.net";

pub type MessageId = String;

#[derive(Debug, Error)]
pub enum JidError {
    #[error("invalid JID format: {0}")]
    InvalidFormat(String),
    #[error("invalid numeric component: {0}")]
    Parse(#[from] std::num::ParseIntError),
}

/// Jabber-style identifier: `user[.agent[:device]]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
    pub agent: u8,
    pub device: u16,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == BROADCAST_SERVER && self.user != STATUS_BROADCAST_USER
    }

    /// True for addressable-device JIDs (companion devices of a user).
    pub fn is_ad(&self) -> bool {
        self.device > 0
            && (self.server == DEFAULT_USER_SERVER
                || self.server == HIDDEN_USER_SERVER
                || self.server == HOSTED_SERVER)
    }

    /// The bare user@server form, without agent/device routing.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            agent: 0,
            device: 0,
        }
    }

    pub fn server_jid() -> Self {
        Self::new("", SERVER_JID)
    }

    pub fn is_same_user_as(&self, other: &Jid) -> bool {
        self.user == other.user && self.server == other.server
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(JidError::InvalidFormat("empty string".into()));
        }
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            // Bare known server names act as server-only JIDs.
            None => {
                let known = [
                    DEFAULT_USER_SERVER,
                    GROUP_SERVER,
                    BROADCAST_SERVER,
                    HIDDEN_USER_SERVER,
                    HOSTED_SERVER,
                ];
                if known.contains(&s) {
                    ("", s)
                } else {
                    return Err(JidError::InvalidFormat(s.to_string()));
                }
            }
        };

        let (user_agent, device) = match user_part.rsplit_once(':') {
            Some((u, d)) => (u, d.parse::<u16>()?),
            None => (user_part, 0),
        };

        // The hidden-user namespace allows dots inside the user identifier,
        // so agent suffixes are only split off for other servers.
        let (user, agent) = if server == HIDDEN_USER_SERVER {
            (user_agent, 0)
        } else {
            match user_agent.rsplit_once('.') {
                Some((u, a)) => match a.parse::<u8>() {
                    Ok(agent) => (u, agent),
                    Err(_) => (user_agent, 0),
                },
                None => (user_agent, 0),
            }
        };

        Ok(Jid {
            user: user.to_string(),
            server: server.to_string(),
            agent,
            device,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        write!(f, "{}", self.user)?;
        // On the canonical servers the agent lives in the wire-level domain
        // byte, not in the textual form.
        if self.agent > 0
            && self.server != DEFAULT_USER_SERVER
            && self.server != HIDDEN_USER_SERVER
            && self.server != HOSTED_SERVER
        {
            write!(f, ".{}", self.agent)?;
        }
        if self.device > 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}
