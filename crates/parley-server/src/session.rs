//! Per-connection state and event dispatch.
//!
//! A session is created for every WebSocket, authenticated or not. Events
//! are handled one at a time, in arrival order. Handler failures are
//! logged and swallowed so the socket stays usable.

use std::ops::ControlFlow;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use parley_shared::error::AuthError;
use parley_shared::protocol::{ClientEvent, NewMessage, ServerEvent};
use parley_shared::types::{ConnectionId, UserId};

use crate::auth::IdentityResolver;
use crate::chat::{ChatError, ChatService};
use crate::rate_limit::TokenBucket;

pub struct Session {
    id: ConnectionId,
    user: Option<UserId>,
    bucket: TokenBucket,
    chat: ChatService,
}

impl Session {
    /// Register the connection and, if the credential resolves to a known
    /// user, bind it and announce the new presence snapshot.
    pub async fn open(
        chat: ChatService,
        resolver: &dyn IdentityResolver,
        token: Option<&str>,
        sender: UnboundedSender<ServerEvent>,
        bucket: TokenBucket,
    ) -> Self {
        let id = ConnectionId::new();
        chat.registry().register(id, sender).await;

        let user = match authenticate(&chat, resolver, token).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(connection_id = %id, reason = %e, "Connection stays anonymous");
                None
            }
        };

        if let Some(user) = user {
            chat.registry().bind(id, user).await;
            chat.presence().connect(user).await;
            let online = chat.presence().snapshot().await;
            chat.registry()
                .broadcast(&ServerEvent::OnlineUser(online))
                .await;
        }

        info!(connection_id = %id, user_id = %describe(user), "Client connected");

        Self {
            id,
            user,
            bucket,
            chat,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    /// Decode and dispatch one text frame. `Break` means the client asked
    /// to disconnect.
    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let event = match ClientEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "Dropping undecodable frame");
                return ControlFlow::Continue(());
            }
        };

        if matches!(event, ClientEvent::Disconnect) {
            return ControlFlow::Break(());
        }

        if !self.bucket.try_consume() {
            warn!(connection_id = %self.id, event = event.name(), "Event rate limit exceeded");
            return ControlFlow::Continue(());
        }

        let name = event.name();
        if let Err(e) = self.dispatch(event).await {
            match e {
                ChatError::Store(_) | ChatError::Unavailable(_) => {
                    error!(connection_id = %self.id, event = name, error = %e, "Event failed")
                }
                ChatError::Validation(_) | ChatError::Forbidden(_) => {
                    warn!(connection_id = %self.id, event = name, error = %e, "Event rejected")
                }
                ChatError::Unauthenticated => {
                    debug!(connection_id = %self.id, event = name, "Ignoring event from anonymous connection")
                }
            }
        }

        ControlFlow::Continue(())
    }

    async fn dispatch(&self, event: ClientEvent) -> Result<(), ChatError> {
        event
            .validate()
            .map_err(|e| ChatError::Validation(e.to_string()))?;
        let user = self.user.ok_or(ChatError::Unauthenticated)?;

        match event {
            ClientEvent::MessagePage(counterpart) => {
                self.chat.open_page(self.id, user, counterpart).await
            }
            ClientEvent::NewMessage(msg) => self.new_message(user, msg).await,
            ClientEvent::Sidebar(viewer) => {
                if viewer != user {
                    return Err(ChatError::Forbidden(
                        "sidebar requested for another user".into(),
                    ));
                }
                self.chat.push_sidebar(self.id, user).await
            }
            ClientEvent::Seen(counterpart) => {
                self.chat.mark_seen(user, counterpart).await.map(|_| ())
            }
            ClientEvent::Disconnect => Ok(()),
        }
    }

    async fn new_message(&self, user: UserId, msg: NewMessage) -> Result<(), ChatError> {
        if msg.sender != user {
            return Err(ChatError::Forbidden(
                "sender does not match the connection identity".into(),
            ));
        }
        self.chat
            .send_message(user, msg.receiver, msg.body)
            .await
            .map(|_| ())
    }

    /// Tear down routing and presence state. Re-broadcasts the snapshot
    /// when the user's last connection closes.
    pub async fn close(self) {
        self.chat.registry().unregister(self.id).await;

        if let Some(user) = self.user {
            if self.chat.presence().disconnect(user).await {
                let online = self.chat.presence().snapshot().await;
                self.chat
                    .registry()
                    .broadcast(&ServerEvent::OnlineUser(online))
                    .await;
            }
        }

        info!(
            connection_id = %self.id,
            user_id = %describe(self.user),
            "Client disconnected"
        );
    }
}

fn describe(user: Option<UserId>) -> String {
    user.map(|u| u.to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn authenticate(
    chat: &ChatService,
    resolver: &dyn IdentityResolver,
    token: Option<&str>,
) -> Result<UserId, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let user = resolver.resolve(token).await?;

    match chat.user_exists(&user).await {
        Ok(true) => Ok(user),
        Ok(false) => Err(AuthError::UnknownUser),
        Err(e) => {
            error!(user_id = %user, error = %e, "User lookup failed during handshake");
            Err(AuthError::UnknownUser)
        }
    }
}
