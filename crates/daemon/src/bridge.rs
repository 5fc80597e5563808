//! Message bridge between the local bus and the cloud session.
//!
//! The bridge owns the two pieces of application-level state that outlive
//! any single cloud connection:
//!
//! - the **subscription set**: topic patterns the cloud asked to receive,
//!   in insertion order, without exact duplicates;
//! - the **retained cache**: the last payload seen for every bus topic whose
//!   first path segment is in the retained-category allow-list, replayed
//!   immediately when the cloud (re)subscribes to a matching pattern.
//!
//! Both survive cloud reconnects and are cleared only on process restart.
//! The bridge performs no I/O; handlers return effect lists that the
//! connection manager applies, which keeps this logic synchronous and
//! directly testable.

use std::collections::HashMap;

use protocol::messages::{Action, Request, Routed};
use serde_json::Value;

/// Side effects requested by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEffect {
    /// Send a routed message to the cloud.
    SendToCloud(Routed),
    /// Register interest in a topic pattern with the local bus.
    SubscribeLocal(String),
    /// Publish a message onto the local bus.
    PublishLocal {
        /// Bare topic to publish under.
        topic: String,
        /// Message body.
        message: Value,
    },
}

/// Test a subscription pattern against a concrete topic.
///
/// A pattern ending in `#` matches every topic starting with the text
/// before the `#`; any other pattern matches only the identical topic.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('#') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// Wire form of a message body: empty objects are omitted, so the routed
/// message carries no `message` field at all.
fn wire_message(message: &Value) -> Option<Value> {
    match message {
        Value::Object(map) if map.is_empty() => None,
        other => Some(other.clone()),
    }
}

/// Subscription set and retained cache with the routing rules around them.
#[derive(Debug)]
pub struct Bridge {
    /// Topic patterns the cloud subscribed to, in insertion order.
    subscriptions: Vec<String>,
    /// Last seen payload per retained topic.
    retained: HashMap<String, Value>,
    /// First path segments eligible for the retained cache.
    categories: Vec<String>,
}

impl Bridge {
    /// Create a bridge with the given retained-category allow-list.
    pub fn new(categories: Vec<String>) -> Self {
        Self {
            subscriptions: Vec::new(),
            retained: HashMap::new(),
            categories,
        }
    }

    /// Patterns currently subscribed, in insertion order.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Number of retained cache entries.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Handle a decoded cloud request.
    ///
    /// `subscribe` adds the pattern (exact-duplicate check only), replays
    /// every cached value whose topic matches it, then registers bus
    /// interest. `publish` forwards to the bus unmodified. Unrecognized
    /// actions produce no effects.
    pub fn handle_request(&mut self, request: Request) -> Vec<BridgeEffect> {
        match request.action {
            Action::Subscribe => self.subscribe(request.topic),
            Action::Publish => vec![BridgeEffect::PublishLocal {
                topic: request.topic,
                message: request.message.unwrap_or_else(|| Value::Object(Default::default())),
            }],
            Action::Other => Vec::new(),
        }
    }

    fn subscribe(&mut self, pattern: String) -> Vec<BridgeEffect> {
        if !self.subscriptions.contains(&pattern) {
            self.subscriptions.push(pattern.clone());
        }

        // Replay cached values so a (re)subscriber sees the latest known
        // state without waiting for the next publish. Keys are sorted to
        // keep the replay order stable.
        let mut matching: Vec<&String> = self
            .retained
            .keys()
            .filter(|topic| topic_matches(&pattern, topic))
            .collect();
        matching.sort();

        let mut effects: Vec<BridgeEffect> = matching
            .into_iter()
            .map(|topic| {
                BridgeEffect::SendToCloud(Routed {
                    topic: topic.clone(),
                    message: self.retained.get(topic).and_then(wire_message),
                })
            })
            .collect();

        effects.push(BridgeEffect::SubscribeLocal(pattern));
        effects
    }

    /// Handle a message arriving from the local bus.
    ///
    /// The retained cache is updated whenever the topic's first path segment
    /// is allow-listed, regardless of subscriptions. Independently, when the
    /// cloud session is `ready`, the message is forwarded on the first
    /// matching subscription pattern - at most one copy per bus message.
    pub fn handle_local(&mut self, topic: &str, message: &Value, ready: bool) -> Option<Routed> {
        let category = topic.split('/').next().unwrap_or_default();
        if self.categories.iter().any(|c| c == category) {
            self.retained.insert(topic.to_string(), message.clone());
        }

        if !ready {
            return None;
        }

        self.subscriptions
            .iter()
            .find(|pattern| topic_matches(pattern, topic))
            .map(|_| Routed {
                topic: topic.to_string(),
                message: wire_message(message),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> Bridge {
        Bridge::new(
            ["device", "expose", "service", "status"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn subscribe(topic: &str) -> Request {
        Request {
            action: Action::Subscribe,
            topic: topic.to_string(),
            message: None,
        }
    }

    #[test]
    fn test_topic_matches_exact() {
        assert!(topic_matches("status/online", "status/online"));
        assert!(!topic_matches("status/online", "status/online/extra"));
        assert!(!topic_matches("status/online", "status"));
    }

    #[test]
    fn test_topic_matches_wildcard() {
        assert!(topic_matches("device/#", "device/1/state"));
        assert!(topic_matches("device/#", "device/"));
        assert!(!topic_matches("device/#", "expose/1"));
        // `#` alone is a match-everything prefix.
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_subscribe_registers_local_interest() {
        let mut bridge = bridge();
        let effects = bridge.handle_request(subscribe("device/#"));
        assert_eq!(
            effects,
            vec![BridgeEffect::SubscribeLocal("device/#".to_string())]
        );
        assert_eq!(bridge.subscriptions(), &["device/#".to_string()]);
    }

    #[test]
    fn test_subscribe_deduplicates_exact_entries() {
        let mut bridge = bridge();
        bridge.handle_request(subscribe("device/#"));
        bridge.handle_request(subscribe("device/#"));
        assert_eq!(bridge.subscriptions().len(), 1);

        // A different pattern is a separate entry even if it overlaps.
        bridge.handle_request(subscribe("device/1/#"));
        assert_eq!(bridge.subscriptions().len(), 2);
    }

    #[test]
    fn test_subscribe_replays_matching_retained() {
        let mut bridge = bridge();
        bridge.handle_local("device/1/state", &json!({"on": true}), false);

        let effects = bridge.handle_request(subscribe("device/#"));
        assert_eq!(
            effects,
            vec![
                BridgeEffect::SendToCloud(Routed {
                    topic: "device/1/state".to_string(),
                    message: Some(json!({"on": true})),
                }),
                BridgeEffect::SubscribeLocal("device/#".to_string()),
            ]
        );
    }

    #[test]
    fn test_subscribe_does_not_replay_other_categories() {
        let mut bridge = bridge();
        bridge.handle_local("device/1/state", &json!({"on": true}), false);

        let effects = bridge.handle_request(subscribe("expose/#"));
        assert_eq!(
            effects,
            vec![BridgeEffect::SubscribeLocal("expose/#".to_string())]
        );
    }

    #[test]
    fn test_subscribe_replays_all_matches_sorted() {
        let mut bridge = bridge();
        bridge.handle_local("status/b", &json!(2), false);
        bridge.handle_local("status/a", &json!(1), false);
        bridge.handle_local("expose/x", &json!(3), false);

        let effects = bridge.handle_request(subscribe("status/#"));
        assert_eq!(effects.len(), 3);
        assert_eq!(
            effects[0],
            BridgeEffect::SendToCloud(Routed {
                topic: "status/a".to_string(),
                message: Some(json!(1)),
            })
        );
        assert_eq!(
            effects[1],
            BridgeEffect::SendToCloud(Routed {
                topic: "status/b".to_string(),
                message: Some(json!(2)),
            })
        );
        assert_eq!(
            effects[2],
            BridgeEffect::SubscribeLocal("status/#".to_string())
        );
    }

    #[test]
    fn test_exact_subscription_replay() {
        let mut bridge = bridge();
        bridge.handle_local("status/online", &json!(true), false);
        bridge.handle_local("status/online/extra", &json!(false), false);

        let effects = bridge.handle_request(subscribe("status/online"));
        assert_eq!(
            effects,
            vec![
                BridgeEffect::SendToCloud(Routed {
                    topic: "status/online".to_string(),
                    message: Some(json!(true)),
                }),
                BridgeEffect::SubscribeLocal("status/online".to_string()),
            ]
        );
    }

    #[test]
    fn test_publish_forwards_to_bus() {
        let mut bridge = bridge();
        let effects = bridge.handle_request(Request {
            action: Action::Publish,
            topic: "td/light/1".to_string(),
            message: Some(json!({"status": "on"})),
        });
        assert_eq!(
            effects,
            vec![BridgeEffect::PublishLocal {
                topic: "td/light/1".to_string(),
                message: json!({"status": "on"}),
            }]
        );
    }

    #[test]
    fn test_publish_without_message_sends_empty_object() {
        let mut bridge = bridge();
        let effects = bridge.handle_request(Request {
            action: Action::Publish,
            topic: "td/light/1".to_string(),
            message: None,
        });
        assert_eq!(
            effects,
            vec![BridgeEffect::PublishLocal {
                topic: "td/light/1".to_string(),
                message: json!({}),
            }]
        );
    }

    #[test]
    fn test_empty_object_forwarded_without_message() {
        // An empty-object payload goes out as a bare topic record, not as
        // `"message": {}`.
        let mut bridge = bridge();
        bridge.handle_request(subscribe("status/#"));

        let routed = bridge.handle_local("status/online", &json!({}), true);
        assert_eq!(
            routed,
            Some(Routed {
                topic: "status/online".to_string(),
                message: None,
            })
        );
    }

    #[test]
    fn test_empty_object_replayed_without_message() {
        let mut bridge = bridge();
        bridge.handle_local("status/online", &json!({}), false);

        let effects = bridge.handle_request(subscribe("status/online"));
        assert_eq!(
            effects[0],
            BridgeEffect::SendToCloud(Routed {
                topic: "status/online".to_string(),
                message: None,
            })
        );
    }

    #[test]
    fn test_unknown_action_ignored() {
        let mut bridge = bridge();
        let effects = bridge.handle_request(Request {
            action: Action::Other,
            topic: "device/#".to_string(),
            message: None,
        });
        assert!(effects.is_empty());
        assert!(bridge.subscriptions().is_empty());
    }

    #[test]
    fn test_local_retained_cached_without_subscription() {
        let mut bridge = bridge();
        assert_eq!(
            bridge.handle_local("service/log", &json!({"level": "info"}), true),
            None
        );
        assert_eq!(bridge.retained_len(), 1);
    }

    #[test]
    fn test_local_non_retained_never_cached() {
        let mut bridge = bridge();
        bridge.handle_local("random/thing", &json!(1), true);
        assert_eq!(bridge.retained_len(), 0);
    }

    #[test]
    fn test_local_non_retained_still_forwarded_when_subscribed() {
        // Cache and forward gate independently: a subscribed pattern outside
        // the retained categories forwards but leaves the cache alone.
        let mut bridge = bridge();
        bridge.handle_request(subscribe("random/#"));

        let routed = bridge.handle_local("random/thing", &json!(7), true);
        assert_eq!(
            routed,
            Some(Routed {
                topic: "random/thing".to_string(),
                message: Some(json!(7)),
            })
        );
        assert_eq!(bridge.retained_len(), 0);
    }

    #[test]
    fn test_local_not_forwarded_when_not_ready() {
        let mut bridge = bridge();
        bridge.handle_request(subscribe("device/#"));

        assert_eq!(bridge.handle_local("device/1", &json!(1), false), None);
        // Still cached while offline.
        assert_eq!(bridge.retained_len(), 1);
    }

    #[test]
    fn test_local_forwarded_once_on_first_match() {
        let mut bridge = bridge();
        bridge.handle_request(subscribe("device/#"));
        bridge.handle_request(subscribe("device/1/#"));

        let routed = bridge.handle_local("device/1/state", &json!(1), true);
        // Exactly one copy, no duplicate for the second matching pattern.
        assert_eq!(
            routed,
            Some(Routed {
                topic: "device/1/state".to_string(),
                message: Some(json!(1)),
            })
        );
    }

    #[test]
    fn test_exact_subscription_does_not_match_longer_topic() {
        let mut bridge = bridge();
        bridge.handle_request(subscribe("status/online"));

        assert!(bridge
            .handle_local("status/online/extra", &json!(1), true)
            .is_none());
        assert!(bridge
            .handle_local("status/online", &json!(1), true)
            .is_some());
    }

    #[test]
    fn test_retained_overwritten_on_new_value() {
        let mut bridge = bridge();
        bridge.handle_local("device/1/state", &json!({"on": false}), false);
        bridge.handle_local("device/1/state", &json!({"on": true}), false);
        assert_eq!(bridge.retained_len(), 1);

        let effects = bridge.handle_request(subscribe("device/1/state"));
        assert_eq!(
            effects[0],
            BridgeEffect::SendToCloud(Routed {
                topic: "device/1/state".to_string(),
                message: Some(json!({"on": true})),
            })
        );
    }

    #[test]
    fn test_custom_categories_respected() {
        let mut bridge = Bridge::new(vec!["custom".to_string()]);
        bridge.handle_local("custom/x", &json!(1), false);
        bridge.handle_local("device/x", &json!(1), false);
        assert_eq!(bridge.retained_len(), 1);
    }

    #[test]
    fn test_state_survives_reconnect_semantics() {
        // The bridge has no notion of a session; ready flips per call and
        // subscriptions/cache persist across the flip.
        let mut bridge = bridge();
        bridge.handle_request(subscribe("status/#"));
        bridge.handle_local("status/x", &json!(1), true);

        assert_eq!(bridge.handle_local("status/y", &json!(2), false), None);
        assert!(bridge.handle_local("status/z", &json!(3), true).is_some());
        assert_eq!(bridge.subscriptions().len(), 1);
        assert_eq!(bridge.retained_len(), 3);
    }
}
