use std::sync::Arc;

use shmeta_protocol::{Channel, ProtocolError, ProtocolResult, Request, Response};
use tracing::debug;

use crate::instance::StoreInstance;
use crate::session::Session;

/// A channel that dispatches straight into an instance in the same process.
///
/// Behaves like a socket: it breaks for good once closed or once the
/// instance shuts down.
#[derive(Debug)]
pub struct InProcessChannel {
    session: Option<Session>,
}

impl InProcessChannel {
    pub fn connect(instance: &Arc<StoreInstance>) -> Self {
        Self {
            session: Some(Session::new(Arc::clone(instance))),
        }
    }
}

impl Channel for InProcessChannel {
    fn call(&mut self, request: &Request) -> ProtocolResult<Response> {
        let Some(session) = self.session.as_mut() else {
            return Err(ProtocolError::Disconnected);
        };
        if !session.instance().is_running() {
            debug!(instance = %session.instance().instance_id(), "in-process channel broken");
            self.session = None;
            return Err(ProtocolError::Disconnected);
        }
        Ok(session.handle(request))
    }

    fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.instance().is_running())
    }

    fn close(&mut self) {
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use shmeta_protocol::{ClientKind, PROTOCOL_VERSION};

    #[test]
    fn calls_reach_the_instance() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let mut ch = InProcessChannel::connect(&inst);
        let resp = ch
            .call(&Request::Register {
                kind: ClientKind::Ipc,
                version: PROTOCOL_VERSION,
            })
            .unwrap();
        assert!(matches!(resp, Response::Registered { .. }));
        assert_eq!(inst.status().ipc_connections, 1);

        ch.close();
        assert!(!ch.is_open());
        assert_eq!(inst.status().ipc_connections, 0);
        assert!(matches!(ch.call(&Request::SyncMeta), Err(ProtocolError::Disconnected)));
    }

    #[test]
    fn breaks_when_instance_shuts_down() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let mut ch = InProcessChannel::connect(&inst);
        assert!(ch.is_open());
        inst.shutdown();
        assert!(!ch.is_open());
        assert!(matches!(ch.call(&Request::SyncMeta), Err(ProtocolError::Disconnected)));
    }
}
