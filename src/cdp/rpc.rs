use crate::cdp::CdpCommand;
use serde_json::Value;
use std::collections::HashMap;

/// Correlates outgoing runtime commands with their replies.
///
/// Every command gets a fresh id, ids are never reused within one channel. The caller
/// attaches a continuation (`P`) that is handed back once the matching reply arrives.
/// There is no timeout: a command stays pending until it is answered or the channel is
/// abandoned on socket close.
#[derive(Debug)]
pub struct RpcChannel<P> {
    next_id: i64,
    pending: HashMap<i64, P>,
    closed: bool,
}

impl<P> Default for RpcChannel<P> {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            closed: false,
        }
    }
}

impl<P> RpcChannel<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command and return the message to put on the wire.
    pub fn send(&mut self, method: &str, params: Value, continuation: P) -> CdpCommand {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, continuation);
        CdpCommand {
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Continuation of the command answered by a reply with `id`, if it is still pending.
    pub fn resolve(&mut self, id: i64) -> Option<P> {
        self.pending.remove(&id)
    }

    pub fn is_pending(&self, id: i64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending continuation without resolving it. Returns how many were dropped.
    pub fn abandon(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic() {
        let mut rpc = RpcChannel::new();
        let a = rpc.send("Runtime.enable", json!({}), "a");
        let b = rpc.send("Debugger.enable", json!({}), "b");
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(rpc.resolve(1), Some("a"));
        let c = rpc.send("Debugger.resume", json!({}), "c");
        assert_eq!(c.id, 3);
    }

    #[test]
    fn test_resolve_only_once() {
        let mut rpc = RpcChannel::new();
        let cmd = rpc.send("Debugger.pause", json!({}), 7);
        assert!(rpc.is_pending(cmd.id));
        assert_eq!(rpc.resolve(cmd.id), Some(7));
        assert_eq!(rpc.resolve(cmd.id), None);
        assert_eq!(rpc.resolve(100), None);
    }

    #[test]
    fn test_abandon() {
        let mut rpc = RpcChannel::new();
        rpc.send("a", json!({}), ());
        rpc.send("b", json!({}), ());
        assert_eq!(rpc.pending_count(), 2);
        assert_eq!(rpc.abandon(), 2);
        assert!(rpc.is_closed());
        assert_eq!(rpc.resolve(1), None);
        // ids keep growing after abandon
        assert_eq!(rpc.send("c", json!({}), ()).id, 3);
    }
}
