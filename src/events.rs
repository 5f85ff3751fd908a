//! Per-node event dispatch.
//!
//! Every node owns an [`EventDispatcher`]; there is no bubbling. Renderers
//! and the tick pass dispatch directly on the node the event concerns.

use std::collections::HashMap;

use crate::tree::NodeId;

/// Event names that mark a node as interactive for hit testing.
pub const MOUSE_EVENTS: [&str; 9] = [
    "click",
    "dblclick",
    "mousedown",
    "mouseout",
    "mouseover",
    "pressmove",
    "pressup",
    "rollout",
    "rollover",
];

/// Data forwarded verbatim from the frame pump into `tick` events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameData {
    /// Milliseconds since the previous frame.
    pub delta: f64,
    pub time: f64,
    pub paused: bool,
    /// Any further properties the frame pump wants to pass along.
    pub extra: HashMap<String, f64>,
}

impl FrameData {
    pub fn with_delta(delta: f64) -> Self {
        Self {
            delta,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: String,
    /// Node the event was dispatched on, if any.
    pub target: Option<NodeId>,
    pub cancelable: bool,
    pub frame: Option<FrameData>,
    /// Animation name for sprite `animationend` events.
    pub name: Option<String>,
    default_prevented: bool,
    immediate_propagation_stopped: bool,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            cancelable: false,
            frame: None,
            name: None,
            default_prevented: false,
            immediate_propagation_stopped: false,
        }
    }

    pub fn cancelable(mut self) -> Self {
        self.cancelable = true;
        self
    }

    pub fn with_frame(mut self, frame: FrameData) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = self.cancelable;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Skips the remaining listeners on the current node.
    pub fn stop_immediate_propagation(&mut self) {
        self.immediate_propagation_stopped = true;
    }
}

pub type Listener = Box<dyn FnMut(&mut Event)>;

/// Handle returned by [`EventDispatcher::add_listener`] for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventDispatcher {
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, kind: impl Into<String>, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(kind.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Returns `true` if a listener was removed.
    pub fn remove_listener(&mut self, kind: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(kind);
        }
        removed
    }

    pub fn remove_all_listeners(&mut self, kind: Option<&str>) {
        match kind {
            Some(kind) => {
                self.listeners.remove(kind);
            }
            None => self.listeners.clear(),
        }
    }

    pub fn has_listener(&self, kind: &str) -> bool {
        self.listeners.get(kind).is_some_and(|l| !l.is_empty())
    }

    pub fn has_mouse_listener(&self) -> bool {
        MOUSE_EVENTS.iter().any(|kind| self.has_listener(kind))
    }

    /// Calls every listener for `event.kind` in registration order.
    ///
    /// Returns `false` if a listener prevented the default on a cancelable
    /// event.
    pub fn dispatch(&mut self, event: &mut Event) -> bool {
        if let Some(list) = self.listeners.get_mut(&event.kind) {
            for (_, listener) in list.iter_mut() {
                listener(event);
                if event.immediate_propagation_stopped {
                    break;
                }
            }
        }
        !event.default_prevented
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.listeners.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch_in_order_and_remove() {
        let calls = Rc::new(Cell::new(0));
        let mut d = EventDispatcher::new();

        let c = calls.clone();
        let first = d.add_listener("tick", Box::new(move |_| c.set(c.get() * 10 + 1)));
        let c = calls.clone();
        d.add_listener("tick", Box::new(move |_| c.set(c.get() * 10 + 2)));

        d.dispatch(&mut Event::new("tick"));
        assert_eq!(calls.get(), 12);

        assert!(d.remove_listener("tick", first));
        assert!(!d.remove_listener("tick", first));
        calls.set(0);
        d.dispatch(&mut Event::new("tick"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_prevent_default_only_when_cancelable() {
        let mut d = EventDispatcher::new();
        d.add_listener("tickstart", Box::new(|e: &mut Event| e.prevent_default()));

        assert!(d.dispatch(&mut Event::new("tickstart")));
        assert!(!d.dispatch(&mut Event::new("tickstart").cancelable()));
    }

    #[test]
    fn test_mouse_listener_detection() {
        let mut d = EventDispatcher::new();
        assert!(!d.has_mouse_listener());
        d.add_listener("tick", Box::new(|_: &mut Event| {}));
        assert!(!d.has_mouse_listener());
        d.add_listener("click", Box::new(|_: &mut Event| {}));
        assert!(d.has_mouse_listener());
    }
}
