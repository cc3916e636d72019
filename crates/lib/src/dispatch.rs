//! Request dispatcher: one webhook call, from tenant lookup to the reply.
//!
//! Stateless per call. Credentials are looked up once and passed explicitly to
//! [`Dispatcher::dispatch_event`]; nothing is registered or captured between calls.

use crate::channels::{
    decode_events, verify_signature, ChannelError, InboundEvent, MessagingGateway,
};
use crate::config::AiConfig;
use crate::context::RequestContext;
use crate::llm::{AiBackend, AiContent, AiRequest, ContentPart};
use crate::registry::{RegistryError, TenantRegistry};
use crate::storage::{
    timestamp_now, AttachmentName, AttachmentStaging, ObjectStore, StorageError,
};
use crate::tenant::TenantCredentials;
use secrecy::ExposeSecret;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Bot info not found")]
    NotFound,
    #[error("Invalid signature. Please check your channel secret and access token.")]
    InvalidSignature,
    #[error("{0}")]
    Decode(ChannelError),
    #[error("fetching attachment failed: {0}")]
    AttachmentFetch(ChannelError),
    #[error("storing attachment failed: {0}")]
    AttachmentStore(#[from] StorageError),
    #[error("{0} did not finish before the request deadline or shutdown")]
    Interrupted(&'static str),
    #[error("sending reply failed: {0}")]
    Reply(ChannelError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Drives one webhook call against the registry and the three outbound clients.
pub struct Dispatcher {
    registry: Arc<dyn TenantRegistry>,
    gateway: Arc<dyn MessagingGateway>,
    ai: Arc<dyn AiBackend>,
    store: Arc<dyn ObjectStore>,
    staging: AttachmentStaging,
    image_prompt: String,
    fallback_reply: String,
    reply_timeout: Duration,
    clock: fn() -> String,
}

/// Run `step` until it completes, the context deadline passes, or the context is cancelled.
async fn within_context<T>(
    ctx: &RequestContext,
    step: &'static str,
    fut: impl Future<Output = Result<T, DispatchError>>,
) -> Result<T, DispatchError> {
    tokio::select! {
        _ = ctx.cancelled() => {
            log::warn!("dispatch: {} {} cancelled", ctx.request_id(), step);
            Err(DispatchError::Interrupted(step))
        }
        outcome = tokio::time::timeout_at(ctx.deadline(), fut) => match outcome {
            Ok(result) => result,
            Err(_) => {
                log::warn!("dispatch: {} {} deadline exceeded", ctx.request_id(), step);
                Err(DispatchError::Interrupted(step))
            }
        },
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        gateway: Arc<dyn MessagingGateway>,
        ai: Arc<dyn AiBackend>,
        store: Arc<dyn ObjectStore>,
        staging: AttachmentStaging,
    ) -> Self {
        let defaults = AiConfig::default();
        Self {
            registry,
            gateway,
            ai,
            store,
            staging,
            image_prompt: defaults.image_prompt,
            fallback_reply: defaults.fallback_reply,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            clock: timestamp_now,
        }
    }

    pub fn with_image_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.image_prompt = prompt.into();
        self
    }

    /// Reply used when the backend produced no text.
    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = reply.into();
        self
    }

    /// Bound on sending one reply. Independent of the request deadline so a fallback reply
    /// still goes out after the AI step used it up or was cancelled.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Timestamp source for attachment names.
    pub fn with_clock(mut self, clock: fn() -> String) -> Self {
        self.clock = clock;
        self
    }

    /// Handle one webhook call. Returns the number of events answered.
    ///
    /// Fails closed: no tenant means [`DispatchError::NotFound`] and no outbound calls;
    /// a missing or wrong signature means [`DispatchError::InvalidSignature`] and no AI call.
    pub async fn handle(
        &self,
        ctx: &RequestContext,
        channel_id: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<usize, DispatchError> {
        let Some(record) = self.registry.get(channel_id).await? else {
            log::info!(
                "dispatch: {} no tenant registered for channel {}",
                ctx.request_id(),
                channel_id
            );
            return Err(DispatchError::NotFound);
        };
        let credentials = &record.credentials;
        let signature = signature.unwrap_or_default();
        if !verify_signature(credentials.line_channel_secret.expose_secret(), body, signature) {
            log::warn!(
                "dispatch: {} invalid signature for channel {}",
                ctx.request_id(),
                channel_id
            );
            return Err(DispatchError::InvalidSignature);
        }
        let events = decode_events(body).map_err(DispatchError::Decode)?;
        for event in &events {
            self.dispatch_event(ctx, credentials, event).await?;
        }
        Ok(events.len())
    }

    /// Answer a single event for the given tenant.
    pub async fn dispatch_event(
        &self,
        ctx: &RequestContext,
        credentials: &TenantCredentials,
        event: &InboundEvent,
    ) -> Result<(), DispatchError> {
        log::info!(
            "dispatch: {} {} event from {} on channel {}",
            ctx.request_id(),
            event.kind(),
            event.sender_id(),
            credentials.line_channel_id
        );
        let content = match event {
            InboundEvent::Text { text, .. } => AiContent::Text(text.clone()),
            InboundEvent::Image {
                sender_id,
                media_id,
                ..
            } => {
                let staged = self.stage_image(ctx, credentials, sender_id, media_id);
                within_context(ctx, "attachment", staged).await?
            }
        };
        let request = AiRequest {
            bot_id: credentials.coze_bot_id.clone(),
            user_id: event.sender_id().to_string(),
            content,
        };
        let reply = self
            .ai
            .converse(ctx, credentials.coze_api_key.expose_secret(), &request)
            .await;
        let reply = if reply.trim().is_empty() {
            log::warn!("dispatch: {} empty reply, sending fallback", ctx.request_id());
            self.fallback_reply.clone()
        } else {
            reply
        };
        let send = self.gateway.reply_text(
            credentials.line_channel_access_token.expose_secret(),
            event.reply_token(),
            &reply,
        );
        match tokio::time::timeout(self.reply_timeout, send).await {
            Ok(sent) => sent.map_err(DispatchError::Reply)?,
            Err(_) => {
                log::warn!("dispatch: {} reply timed out", ctx.request_id());
                return Err(DispatchError::Interrupted("reply"));
            }
        }
        log::info!(
            "dispatch: {} replied to {} ({} chars)",
            ctx.request_id(),
            event.sender_id(),
            reply.chars().count()
        );
        Ok(())
    }

    /// Download, stage, and upload an image; returns the multi-part content pointing at its public URL.
    async fn stage_image(
        &self,
        ctx: &RequestContext,
        credentials: &TenantCredentials,
        sender_id: &str,
        media_id: &str,
    ) -> Result<AiContent, DispatchError> {
        let bytes = self
            .gateway
            .fetch_content(credentials.line_channel_access_token.expose_secret(), media_id)
            .await
            .map_err(DispatchError::AttachmentFetch)?;
        let name = AttachmentName::new(sender_id, media_id, (self.clock)());
        self.staging.save(&name, &bytes).await?;
        self.store
            .upload(
                &credentials.cloud_storage_bucket_name,
                &name.object_key(),
                bytes,
                IMAGE_CONTENT_TYPE,
            )
            .await?;
        let file_url = name.public_url(ctx.server_root());
        log::debug!("dispatch: {} image available at {}", ctx.request_id(), file_url);
        Ok(AiContent::Object(vec![
            ContentPart::Image { file_url },
            ContentPart::Text {
                text: self.image_prompt.clone(),
            },
        ]))
    }
}
