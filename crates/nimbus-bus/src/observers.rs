use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// Typed callback registry. Every dispatch reaches each current observer
/// exactly once, in subscription order.
pub struct ObserverSet<E> {
    next_id: u64,
    observers: Vec<(ObserverId, Callback<E>)>,
}

impl<E> ObserverSet<E> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            observers: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub fn dispatch(&mut self, event: &E) {
        for (_, callback) in self.observers.iter_mut() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<E> Default for ObserverSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn dispatch_reaches_each_observer_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut set = ObserverSet::new();
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            set.subscribe(move |value: &u32| seen.lock().unwrap().push(format!("{tag}{value}")));
        }
        set.dispatch(&1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1"]);
    }

    #[test]
    fn unsubscribed_observers_stop_receiving() {
        let count = Arc::new(Mutex::new(0));
        let mut set = ObserverSet::new();
        let counter = Arc::clone(&count);
        let id = set.subscribe(move |_: &()| *counter.lock().unwrap() += 1);
        set.dispatch(&());
        assert!(set.unsubscribe(id));
        assert!(!set.unsubscribe(id));
        set.dispatch(&());
        assert_eq!(*count.lock().unwrap(), 1);
        assert!(set.is_empty());
    }
}
