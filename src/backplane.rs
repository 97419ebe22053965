//! Wire formats for the cross-instance cache invalidation backplane.
//!
//! Grounded on the teacher's `InvalidationMessage` enum in `invalidation.rs`
//! (`Remove`, `Update`, `RemovePattern`, `RemoveBulk`), trimmed to the three
//! operations `CacheManager` actually needs to keep peers' L1s coherent and
//! split one per wire channel (`cache:invalidate`, `cache:invalidate:tags`,
//! `cache:clear`) rather than one tagged enum on a single channel, so a peer
//! only has to decode the payload shape it subscribed to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateMessage {
    pub store: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateTagsMessage {
    pub store: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearMessage {
    pub store: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_message_round_trips_through_json() {
        let msg = InvalidateMessage { store: "default".into(), keys: vec!["a".into(), "b".into()] };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: InvalidateMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.store, "default");
        assert_eq!(decoded.keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn clear_message_round_trips_through_json() {
        let msg = ClearMessage { store: "default".into() };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ClearMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.store, "default");
    }
}
