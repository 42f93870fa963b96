/// Returned by a listener after it has seen a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listen {
    Keep,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Subscriber registry for `consent_update` notifications.
///
/// Subscribers are plain tags; the owner of the channel routes each
/// notification to the component the tag names and reports back whether
/// that component wants further notifications.
#[derive(Debug, Clone)]
pub struct ConsentChannel<S> {
    next_id: u64,
    listeners: Vec<(ListenerId, S)>,
}

impl<S> Default for ConsentChannel<S> {
    fn default() -> Self {
        ConsentChannel {
            next_id: 1,
            listeners: Vec::new(),
        }
    }
}

impl<S: Copy + PartialEq> ConsentChannel<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribing the same tag twice returns the existing id.
    pub fn subscribe(&mut self, subscriber: S) -> ListenerId {
        if let Some((id, _)) = self.listeners.iter().find(|(_, s)| *s == subscriber) {
            return *id;
        }
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, subscriber));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn is_subscribed(&self, subscriber: S) -> bool {
        self.listeners.iter().any(|(_, s)| *s == subscriber)
    }

    /// Snapshot in subscription order, taken before any listener runs.
    pub fn listeners(&self) -> Vec<(ListenerId, S)> {
        self.listeners.clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver to every current listener, dropping those that answer `Done`.
    pub fn notify<F>(&mut self, mut deliver: F)
    where
        F: FnMut(S) -> Listen,
    {
        for (id, subscriber) in self.listeners() {
            if deliver(subscriber) == Listen::Done {
                self.unsubscribe(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Tag {
        A,
        B,
    }

    #[test]
    fn subscribe_is_idempotent_per_tag() {
        let mut ch = ConsentChannel::new();
        let a1 = ch.subscribe(Tag::A);
        let a2 = ch.subscribe(Tag::A);
        let b = ch.subscribe(Tag::B);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn done_listeners_are_removed() {
        let mut ch = ConsentChannel::new();
        ch.subscribe(Tag::A);
        ch.subscribe(Tag::B);
        let mut seen = Vec::new();
        ch.notify(|t| {
            seen.push(t);
            if t == Tag::A { Listen::Done } else { Listen::Keep }
        });
        assert_eq!(seen, vec![Tag::A, Tag::B]);
        assert!(!ch.is_subscribed(Tag::A));
        assert!(ch.is_subscribed(Tag::B));

        seen.clear();
        ch.notify(|t| {
            seen.push(t);
            Listen::Keep
        });
        assert_eq!(seen, vec![Tag::B]);
    }

    #[test]
    fn unsubscribe_unknown_id_is_noop() {
        let mut ch: ConsentChannel<Tag> = ConsentChannel::new();
        let id = ch.subscribe(Tag::A);
        assert!(ch.unsubscribe(id));
        assert!(!ch.unsubscribe(id));
        assert!(ch.is_empty());
    }
}
