use crate::core::types::{
    Dictionary,
    Value,
};

/// Advanced features for WAMP peers, related to pub/sub.
#[derive(Debug, Default, Clone)]
pub struct PubSubFeatures {}

impl PubSubFeatures {
    /// Renders the features into a dictionary for role advertisement.
    pub fn to_dictionary(&self) -> Dictionary {
        Dictionary::default()
    }
}

/// Advanced features for WAMP peers, related to RPCs.
#[derive(Debug, Default, Clone)]
pub struct RpcFeatures {
    /// A caller may actively cancel a procedure call.
    pub call_canceling: bool,
    /// Procedures may produce progressive results.
    pub progressive_call_results: bool,
    /// The peer can enforce call timeouts.
    pub call_timeout: bool,
    /// Callers may disclose their identity to callees.
    pub caller_identification: bool,
}

impl RpcFeatures {
    /// Renders the features into a dictionary for role advertisement.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut dictionary = Dictionary::default();
        dictionary.insert(
            "call_canceling".to_owned(),
            Value::Bool(self.call_canceling),
        );
        dictionary.insert(
            "progressive_call_results".to_owned(),
            Value::Bool(self.progressive_call_results),
        );
        dictionary.insert("call_timeout".to_owned(), Value::Bool(self.call_timeout));
        dictionary.insert(
            "caller_identification".to_owned(),
            Value::Bool(self.caller_identification),
        );
        dictionary
    }
}
