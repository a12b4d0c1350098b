//! Connection entry point shared by the WebSocket server and tests.
//!
//! A connection either presents a resumption token and is reattached to its
//! session, or performs a handshake and gets a new one.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use weft_core::ClassRegistry;
use weft_types::wire::methods;
use weft_types::Envelope;

use crate::collaborators::{AssetRegistry, PageRouter, Services, UploadBroker};
use crate::error::{ConnectError, RegistryError};
use crate::handshake::await_handshake;
use crate::registry::SessionRegistry;
use crate::session::{SessionConfig, SessionHandle, SessionToken};
use crate::transport::{Transport, CLOSE_INVALID_SESSION, CLOSE_NORMAL};

/// What every session of a server is built from.
#[derive(Clone)]
pub struct Application {
    pub registry: Arc<ClassRegistry>,
    pub router: Arc<dyn PageRouter>,
    pub services: Services,
}

impl Application {
    pub fn new(
        registry: ClassRegistry,
        router: impl PageRouter + 'static,
        assets: Arc<AssetRegistry>,
        uploads: Arc<UploadBroker>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            router: Arc::new(router),
            services: Services { assets, uploads },
        }
    }
}

pub struct SessionHost {
    app: Application,
    sessions: SessionRegistry,
    config: SessionConfig,
    handshake_timeout: Duration,
}

impl SessionHost {
    pub fn new(
        app: Application,
        sessions: SessionRegistry,
        config: SessionConfig,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            app,
            sessions,
            config,
            handshake_timeout,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Attach a fresh connection to a session.
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        token: Option<&str>,
    ) -> Result<SessionHandle, ConnectError> {
        match token {
            Some(token) => self.resume(transport, token).await,
            None => self.establish(transport).await,
        }
    }

    async fn resume(
        &self,
        transport: Arc<dyn Transport>,
        token: &str,
    ) -> Result<SessionHandle, ConnectError> {
        match self.sessions.resume(token, transport.clone()) {
            Ok(handle) => Ok(handle),
            Err(err @ RegistryError::InvalidToken) => {
                info!("rejecting connection with invalid session token");
                let notice = Envelope::notification(methods::INVALID_SESSION, json!({}));
                if let Err(err) = transport.send(&notice).await {
                    warn!(?err, "failed to send invalidSession");
                }
                transport.close(CLOSE_INVALID_SESSION, "invalid session").await;
                Err(err.into())
            }
        }
    }

    async fn establish(&self, transport: Arc<dyn Transport>) -> Result<SessionHandle, ConnectError> {
        let handshake = match await_handshake(transport.as_ref(), self.handshake_timeout).await {
            Ok(handshake) => handshake,
            Err(err) => {
                warn!(%err, "handshake failed; no session created");
                if !transport.is_closed() {
                    transport.close(CLOSE_NORMAL, "handshake failed").await;
                }
                return Err(err.into());
            }
        };

        let token = SessionToken::generate();
        let established = json!({ "sessionToken": token.as_str() });
        let reply = match &handshake.request_id {
            Some(id) => Envelope::response_ok(id.clone(), established),
            None => Envelope::notification(methods::SESSION_ESTABLISHED, established),
        };
        if let Err(err) = transport.send(&reply).await {
            warn!(%err, "client went away during the handshake");
            return Err(ConnectError::Handshake(err.into()));
        }

        let handle = SessionHandle::start(
            token,
            handshake.descriptor,
            transport,
            &self.app,
            &self.config,
        );
        self.sessions.insert(handle.clone());
        Ok(handle)
    }
}
