use std::sync::Arc;

use shmeta_protocol::{ClientKind, Request, Response};
use shmeta_types::ErrorKind;

use crate::instance::StoreInstance;

/// Server side of one client connection.
///
/// Tracks the handshake so the instance's connection counters stay exact:
/// a session counts from a successful `Register` until `Exit` or drop.
#[derive(Debug)]
pub struct Session {
    instance: Arc<StoreInstance>,
    kind: Option<ClientKind>,
}

impl Session {
    pub fn new(instance: Arc<StoreInstance>) -> Self {
        Self {
            instance,
            kind: None,
        }
    }

    pub fn instance(&self) -> &Arc<StoreInstance> {
        &self.instance
    }

    pub fn is_registered(&self) -> bool {
        self.kind.is_some()
    }

    pub fn handle(&mut self, request: &Request) -> Response {
        match (request, self.kind) {
            (Request::Register { kind, .. }, None) => {
                let response = self.instance.handle(request);
                if matches!(response, Response::Registered { .. }) {
                    self.instance.attach(*kind);
                    self.kind = Some(*kind);
                }
                response
            }
            (Request::Register { .. }, Some(_)) => {
                Response::error(ErrorKind::IllegalState, "session is already registered")
            }
            (_, None) => Response::error(
                ErrorKind::Connection,
                format!("{} before Register", request.type_name()),
            ),
            (Request::Exit, Some(_)) => {
                self.end();
                Response::Exited
            }
            (_, Some(_)) => self.instance.handle(request),
        }
    }

    /// Stop counting this session. Idempotent.
    pub fn end(&mut self) {
        if let Some(kind) = self.kind.take() {
            self.instance.detach(kind);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use shmeta_protocol::PROTOCOL_VERSION;

    fn register(kind: ClientKind) -> Request {
        Request::Register {
            kind,
            version: PROTOCOL_VERSION,
        }
    }

    #[test]
    fn requests_before_register_are_refused() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let mut session = Session::new(inst);
        let resp = session.handle(&Request::SyncMeta);
        assert!(matches!(resp, Response::Error { kind: ErrorKind::Connection, .. }));
    }

    #[test]
    fn register_counts_until_exit() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let mut session = Session::new(Arc::clone(&inst));
        assert!(matches!(session.handle(&register(ClientKind::Rpc)), Response::Registered { .. }));
        assert_eq!(inst.status().rpc_connections, 1);

        let again = session.handle(&register(ClientKind::Rpc));
        assert!(matches!(again, Response::Error { kind: ErrorKind::IllegalState, .. }));

        assert_eq!(session.handle(&Request::Exit), Response::Exited);
        assert_eq!(inst.status().rpc_connections, 0);
        assert!(!session.is_registered());
    }

    #[test]
    fn drop_detaches() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        {
            let mut session = Session::new(Arc::clone(&inst));
            session.handle(&register(ClientKind::Ipc));
            assert_eq!(inst.status().ipc_connections, 1);
        }
        assert_eq!(inst.status().ipc_connections, 0);
    }

    #[test]
    fn rejected_handshake_is_not_counted() {
        let inst = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let mut session = Session::new(Arc::clone(&inst));
        let resp = session.handle(&Request::Register {
            kind: ClientKind::Ipc,
            version: PROTOCOL_VERSION + 1,
        });
        assert!(matches!(resp, Response::Error { .. }));
        assert!(!session.is_registered());
        assert_eq!(inst.status().ipc_connections, 0);
    }
}
