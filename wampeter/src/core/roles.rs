use crate::core::{
    features::{
        PubSubFeatures,
        RpcFeatures,
    },
    hash::HashSet,
    types::{
        Dictionary,
        Value,
    },
};

/// A role a peer can take on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    // Calls RPC endpoints.
    Caller,
    // Registers RPC endpoints.
    Callee,
    // Publishes events to topics.
    Publisher,
    // Subscribes to events for topics.
    Subscriber,
}

impl TryFrom<&str> for PeerRole {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "caller" => Ok(Self::Caller),
            "callee" => Ok(Self::Callee),
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            _ => Err(Self::Error::msg(format!("invalid peer role: {value}"))),
        }
    }
}

impl Into<&'static str> for PeerRole {
    fn into(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl Into<String> for PeerRole {
    fn into(self) -> String {
        Into::<&'static str>::into(self).to_owned()
    }
}

impl ToString for PeerRole {
    fn to_string(&self) -> String {
        (*self).into()
    }
}

/// The set of roles, with advertised features, that a peer announces during session
/// establishment.
#[derive(Debug, Clone)]
pub struct PeerRoles {
    roles: HashSet<PeerRole>,
    pub_sub_features: PubSubFeatures,
    rpc_features: RpcFeatures,
}

impl PeerRoles {
    /// Creates a new set of peer roles.
    pub fn new(
        roles: HashSet<PeerRole>,
        pub_sub_features: PubSubFeatures,
        rpc_features: RpcFeatures,
    ) -> Self {
        Self {
            roles,
            pub_sub_features,
            rpc_features,
        }
    }

    /// Renders the roles into the `roles` dictionary carried in HELLO details.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut dictionary = Dictionary::default();
        for role in &self.roles {
            let features = match role {
                PeerRole::Caller | PeerRole::Callee => self.rpc_features.to_dictionary(),
                PeerRole::Publisher | PeerRole::Subscriber => {
                    self.pub_sub_features.to_dictionary()
                }
            };
            let mut role_dictionary = Dictionary::default();
            role_dictionary.insert("features".to_owned(), Value::Dictionary(features));
            dictionary.insert(role.to_string(), Value::Dictionary(role_dictionary));
        }
        dictionary
    }
}

#[cfg(test)]
mod roles_test {
    use crate::core::{
        features::{
            PubSubFeatures,
            RpcFeatures,
        },
        hash::HashSet,
        roles::{
            PeerRole,
            PeerRoles,
        },
        types::Value,
    };

    #[test]
    fn renders_role_features() {
        let roles = PeerRoles::new(
            HashSet::from_iter([PeerRole::Caller, PeerRole::Subscriber]),
            PubSubFeatures::default(),
            RpcFeatures {
                call_canceling: true,
                progressive_call_results: true,
                call_timeout: false,
                caller_identification: false,
            },
        );
        let dictionary = roles.to_dictionary();
        assert_eq!(dictionary.len(), 2);
        assert_matches::assert_matches!(
            dictionary
                .get("caller")
                .and_then(|role| role.dictionary())
                .and_then(|role| role.get("features"))
                .and_then(|features| features.dictionary())
                .and_then(|features| features.get("call_canceling")),
            Some(Value::Bool(true))
        );
        assert_matches::assert_matches!(
            dictionary
                .get("subscriber")
                .and_then(|role| role.dictionary())
                .and_then(|role| role.get("features"))
                .and_then(|features| features.dictionary()),
            Some(features) => {
                assert!(features.is_empty());
            }
        );
    }
}
