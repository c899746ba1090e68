//! Access-Request processing.
//!
//! Every failure mode past packet verification yields an
//! Access-Reject with a generic Reply-Message; the reason is logged
//! server-side but never exposed on the wire.

use crate::events::{AaaEvent, EventBus, EventKind, EventResult};
use crate::registry::{AccountRegistry, Credential, NasClient};
use crate::store::SessionStore;
use aaa_proto::{
    auth::decrypt_user_password, Attribute, AttributeType, Code, Packet, PacketError,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

const SERVICE_TYPE_FRAMED: u32 = 2;
const FRAMED_PROTOCOL_PPP: u32 = 1;

pub struct AuthEngine {
    accounts: Arc<dyn AccountRegistry>,
    store: Arc<SessionStore>,
    events: EventBus,
    /// Advertised Acct-Interim-Interval, seconds.
    interim_interval: u32,
}

impl AuthEngine {
    pub fn new(
        accounts: Arc<dyn AccountRegistry>,
        store: Arc<SessionStore>,
        events: EventBus,
        interim_interval: u32,
    ) -> Self {
        AuthEngine {
            accounts,
            store,
            events,
            interim_interval,
        }
    }

    /// Decide an Access-Request. The password check runs on the
    /// blocking pool when the stored credential is a bcrypt hash.
    pub async fn handle(
        &self,
        request: &Packet,
        nas: &NasClient,
    ) -> Result<Packet, PacketError> {
        let username = request
            .find_attribute(AttributeType::UserName as u8)
            .and_then(|attr| attr.as_string());
        let Some(username) = username else {
            warn!(nas = %nas.identifier, "Access-Request without User-Name");
            return self.reject(request, nas, None);
        };

        let Some(password_attr) = request.find_attribute(AttributeType::UserPassword as u8)
        else {
            warn!(username = %username, nas = %nas.identifier, "Access-Request without User-Password");
            return self.reject(request, nas, Some(&username));
        };

        let password = match decrypt_user_password(
            &password_attr.value,
            nas.secret(),
            &request.authenticator,
        ) {
            Ok(password) => password,
            Err(err) => {
                warn!(username = %username, nas = %nas.identifier, %err, "failed to decode User-Password");
                return self.reject(request, nas, Some(&username));
            }
        };

        let Some(account) = self.accounts.lookup(&username) else {
            info!(username = %username, nas = %nas.identifier, "rejecting unknown user");
            return self.reject(request, nas, Some(&username));
        };

        if !account.active {
            info!(username = %username, "rejecting disabled account");
            return self.reject(request, nas, Some(&username));
        }
        if account.is_expired(Utc::now()) {
            info!(username = %username, "rejecting expired account");
            return self.reject(request, nas, Some(&username));
        }

        if !verify_password(&account.credential, password).await {
            info!(username = %username, nas = %nas.identifier, "rejecting bad password");
            return self.reject(request, nas, Some(&username));
        }

        if account.over_quota() {
            info!(
                username = %username,
                consumed = account.consumed_bytes,
                quota = account.quota_bytes,
                "rejecting user over traffic quota"
            );
            return self.reject(request, nas, Some(&username));
        }

        if let Err(denied) = self.store.reserve(&username, account.max_sessions) {
            info!(
                username = %username,
                active = denied.active,
                pending = denied.pending,
                limit = account.max_sessions,
                "rejecting user at concurrency limit"
            );
            return self.reject(request, nas, Some(&username));
        }

        info!(username = %username, nas = %nas.identifier, "access accepted");
        self.events.publish(AaaEvent::new(
            EventKind::Auth,
            EventResult::Accept,
            Some(&username),
            &nas.identifier,
        ));

        let mut accept = Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
        accept.add_attribute(Attribute::string(
            AttributeType::ReplyMessage,
            "Authentication successful",
        )?);
        accept.add_attribute(Attribute::integer(
            AttributeType::ServiceType,
            SERVICE_TYPE_FRAMED,
        )?);
        accept.add_attribute(Attribute::integer(
            AttributeType::FramedProtocol,
            FRAMED_PROTOCOL_PPP,
        )?);
        accept.add_attribute(Attribute::integer(
            AttributeType::AcctInterimInterval,
            self.interim_interval,
        )?);
        Ok(accept)
    }

    fn reject(
        &self,
        request: &Packet,
        nas: &NasClient,
        username: Option<&str>,
    ) -> Result<Packet, PacketError> {
        self.events.publish(AaaEvent::new(
            EventKind::Auth,
            EventResult::Reject,
            username,
            &nas.identifier,
        ));

        let mut reject = Packet::new(Code::AccessReject, request.identifier, [0u8; 16]);
        // Deliberately generic; the real reason stays in the logs.
        reject.add_attribute(Attribute::string(
            AttributeType::ReplyMessage,
            "Authentication failed",
        )?);
        Ok(reject)
    }
}

async fn verify_password(credential: &Credential, password: String) -> bool {
    match credential {
        Credential::ClearText(_) => credential.verify(&password),
        Credential::Bcrypt(_) => {
            let credential = credential.clone();
            tokio::task::spawn_blocking(move || credential.verify(&password))
                .await
                .unwrap_or(false)
        }
    }
}
