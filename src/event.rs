use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;

use crate::arena::NodeId;

/// A fired listener, addressed to the component that owns its handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEvent {
    pub target: NodeId,
    pub handler: String,
    pub event: String,
    pub data: Value,
}

impl NodeEvent {
    pub fn new(target: NodeId, handler: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            target,
            handler: handler.into(),
            event: event.into(),
            data,
        }
    }
}

/// Callback handed to a render target for one listener. Invoking it never
/// touches the compiler; the returned event is fed back through
/// `Compiler::emit`.
pub type ListenerCallback = Rc<dyn Fn(Value) -> NodeEvent>;

pub fn listener_callback(target: NodeId, handler: &str, event: &str) -> ListenerCallback {
    let handler = handler.to_string();
    let event = event.to_string();
    Rc::new(move |data| NodeEvent::new(target, handler.clone(), event.clone(), data))
}
