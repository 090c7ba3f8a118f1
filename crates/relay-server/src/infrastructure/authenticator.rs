//! HMAC-SHA256 subscription proofs checked against the application secret.

use std::sync::Arc;

use relay_core::protocol::verify_channel_auth;
use relay_core::{AppId, SocketId};
use tracing::debug;

use crate::application::ports::{AppRegistry, Authenticator};

/// Verifies `auth` values of the form `key:hex(hmac_sha256(secret, data))`.
pub struct HmacAuthenticator {
    apps: Arc<dyn AppRegistry>,
}

impl HmacAuthenticator {
    pub fn new(apps: Arc<dyn AppRegistry>) -> Self {
        Self { apps }
    }
}

impl Authenticator for HmacAuthenticator {
    fn verify(
        &self,
        app_id: &AppId,
        socket_id: &SocketId,
        channel: &str,
        channel_data: Option<&str>,
        proof: &str,
    ) -> bool {
        let Some(app) = self.apps.resolve(app_id) else {
            debug!("auth check for unknown application {app_id}");
            return false;
        };
        verify_channel_auth(
            &app.key,
            &app.secret,
            socket_id.as_str(),
            channel,
            channel_data,
            proof,
        )
    }
}
