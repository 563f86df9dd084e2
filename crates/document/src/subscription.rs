use crate::Edit;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Fan-out point for change records. Dropping a [`Subscription`] detaches it;
/// the topic sheds dead subscribers on the next publish.
#[derive(Default)]
pub(crate) struct Topic(Mutex<Vec<Weak<Mutex<Vec<Edit>>>>>);

/// Accumulates the edits published since the last [`consume`](Self::consume).
///
/// Successive edits are expressed in the coordinate space left behind by the
/// ones before them, so consumers can replay them in order against their own
/// copy of the text.
pub struct Subscription(Arc<Mutex<Vec<Edit>>>);

impl Topic {
    pub fn subscribe(&self) -> Subscription {
        let subscription = Subscription(Default::default());
        self.0.lock().push(Arc::downgrade(&subscription.0));
        subscription
    }

    pub fn publish(&self, edit: &Edit) {
        self.0.lock().retain(|subscription| {
            if let Some(edits) = subscription.upgrade() {
                edits.lock().push(edit.clone());
                true
            } else {
                false
            }
        });
    }
}

impl Subscription {
    pub fn consume(&self) -> Vec<Edit> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_consume() {
        let topic = Topic::default();
        let subscription = topic.subscribe();
        let first = Edit { old: 0..0, new: 0..3 };
        let second = Edit { old: 1..2, new: 1..1 };
        topic.publish(&first);
        topic.publish(&second);
        assert_eq!(subscription.consume(), [first, second]);
        assert!(subscription.consume().is_empty());
    }

    #[test]
    fn test_dropped_subscription_stops_receiving() {
        let topic = Topic::default();
        let subscription = topic.subscribe();
        topic.publish(&Edit { old: 0..0, new: 0..1 });
        drop(subscription);
        topic.publish(&Edit { old: 0..0, new: 0..1 });
        assert!(topic.0.lock().is_empty());
    }
}
