/// Consumer on the far side of a queue, normally a third-party runtime that
/// has finished loading.
pub trait Sink<T> {
    fn consume(&mut self, item: &T);
}

/// Append-only FIFO buffer shared by everything on the page.
///
/// Items pushed before a sink is attached wait in arrival order; `attach`
/// drains that backlog, after which each push is forwarded as it arrives.
/// Nothing is ever removed, so earlier entries stay readable the way
/// `window.dataLayer` does. Never attaching is a valid steady state.
pub struct DrainQueue<T> {
    items: Vec<T>,
    delivered: usize,
    sink: Option<Box<dyn Sink<T>>>,
}

impl<T> Default for DrainQueue<T> {
    fn default() -> Self {
        DrainQueue {
            items: Vec::new(),
            delivered: 0,
            sink: None,
        }
    }
}

impl<T> DrainQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.flush();
    }

    /// Attach the consumer and hand it the backlog. A second attach replaces
    /// the sink; already-delivered items are not replayed.
    pub fn attach(&mut self, sink: Box<dyn Sink<T>>) -> usize {
        self.sink = Some(sink);
        self.flush()
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Items still waiting for a consumer.
    pub fn pending(&self) -> &[T] {
        &self.items[self.delivered..]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn flush(&mut self) -> usize {
        let Some(sink) = self.sink.as_mut() else {
            return 0;
        };
        let start = self.delivered;
        for item in &self.items[start..] {
            sink.consume(item);
        }
        self.delivered = self.items.len();
        self.delivered - start
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DrainQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainQueue")
            .field("items", &self.items)
            .field("delivered", &self.delivered)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Collect(Rc<RefCell<Vec<u32>>>);

    impl Sink<u32> for Collect {
        fn consume(&mut self, item: &u32) {
            self.0.borrow_mut().push(*item);
        }
    }

    #[test]
    fn backlog_drains_in_arrival_order() {
        let mut q = DrainQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pending(), &[1, 2, 3]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        assert_eq!(q.attach(Box::new(Collect(seen.clone()))), 3);
        assert!(q.pending().is_empty());

        q.push(4);
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
        assert_eq!(q.items(), &[1, 2, 3, 4]);
    }

    #[test]
    fn without_sink_items_wait_forever() {
        let mut q = DrainQueue::new();
        for i in 0..100 {
            q.push(i);
        }
        assert!(!q.is_attached());
        assert_eq!(q.pending().len(), 100);
    }

    #[test]
    fn reattach_does_not_replay() {
        let mut q = DrainQueue::new();
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));
        q.push(7);
        q.attach(Box::new(Collect(first.clone())));
        assert_eq!(q.attach(Box::new(Collect(second.clone()))), 0);
        q.push(8);
        assert_eq!(*first.borrow(), vec![7]);
        assert_eq!(*second.borrow(), vec![8]);
    }
}
