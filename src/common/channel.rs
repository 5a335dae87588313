use super::BroadcastId;

/// Name of the channel a broadcast request for `name` is published on.
///
/// Every listener of `name` subscribes to this one channel, so the
/// derivation must stay byte-for-byte stable across implementations.
pub fn request_channel(name: &str) -> String {
    format!("broadcast:request:{name}")
}

/// Name of the reply channel for a single conversation. Unique per broadcast
/// id so that replies rendezvous with exactly one requester.
pub fn reply_channel(name: &str, id: &BroadcastId) -> String {
    format!("broadcast:reply:{name}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn request_channel_should_be_deterministic_for_a_name() {
        assert_eq!(request_channel("jobs"), "broadcast:request:jobs");
        assert_eq!(request_channel("jobs"), request_channel("jobs"));
    }

    #[test]
    fn reply_channel_should_be_unique_per_broadcast_id() {
        let a = reply_channel("jobs", &"1".to_string());
        let b = reply_channel("jobs", &"2".to_string());
        assert_eq!(a, "broadcast:reply:jobs:1");
        assert_ne!(a, b);
    }
}
