use crate::integrations::{FetchContext, Integration};
use crate::models::WebhookSubscription;
use crate::store::Store;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

/// What `SubscriptionManager::ensure` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// A remote subscription for this deployment already had a local record.
    Reused(WebhookSubscription),
    /// A remote subscription existed without a local record and was recorded as pending.
    Adopted(WebhookSubscription),
    /// A new remote subscription was created and recorded as pending.
    Created(WebhookSubscription),
}

impl SubscriptionOutcome {
    pub fn subscription(&self) -> &WebhookSubscription {
        match self {
            SubscriptionOutcome::Reused(s)
            | SubscriptionOutcome::Adopted(s)
            | SubscriptionOutcome::Created(s) => s,
        }
    }
}

/// Drives the `NONE -> PENDING -> VALIDATED` lifecycle from the client side.
///
/// `ensure` only ever moves a subscription to pending; validation happens when
/// the provider's ping is answered by the dispatcher.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    public_base_url: String,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn Store>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn callback_url(&self, integration_key: &str) -> String {
        format!("{}/webhooks/{}", self.public_base_url, integration_key)
    }

    #[tracing::instrument(level = "info", skip_all, fields(dataset_id = %ctx.dataset.id, integration = %integration.key))]
    pub async fn ensure(
        &self,
        ctx: &FetchContext<'_>,
        integration: &Integration,
    ) -> Result<SubscriptionOutcome> {
        let Some(hooks) = &integration.webhooks else {
            return Err(Error::InvalidInput(format!(
                "integration '{}' has no webhook hooks",
                integration.key
            )));
        };
        let callback_url = self.callback_url(&integration.key);

        let existing = hooks
            .list_remote(ctx)
            .await?
            .into_iter()
            .find(|r| r.callback_url == callback_url);

        if let Some(remote) = existing {
            if let Some(local) = self
                .store
                .get_subscription(&integration.key, &remote.remote_id)
                .await?
            {
                tracing::debug!(remote_id = %remote.remote_id, state = local.state.as_str(), "reusing webhook subscription");
                return Ok(SubscriptionOutcome::Reused(local));
            }
            if let Some(secret) = remote.secret {
                let sub = WebhookSubscription::new_pending(
                    ctx.dataset.id,
                    &integration.key,
                    remote.remote_id,
                    callback_url,
                    secret,
                    Utc::now(),
                )?;
                self.store.put_subscription(&sub).await?;
                tracing::info!(remote_id = %sub.remote_id, "adopted webhook subscription");
                return Ok(SubscriptionOutcome::Adopted(sub));
            }
            tracing::warn!(
                remote_id = %remote.remote_id,
                "remote subscription has no readable secret; creating a new one"
            );
        }

        let created = hooks.create_remote(ctx, &callback_url).await?;
        let secret = created.secret.ok_or_else(|| {
            Error::provider_message(
                integration.key.clone(),
                "created webhook subscription carries no secret",
            )
        })?;
        let sub = WebhookSubscription::new_pending(
            ctx.dataset.id,
            &integration.key,
            created.remote_id,
            callback_url,
            secret,
            Utc::now(),
        )?;
        self.store.put_subscription(&sub).await?;
        tracing::info!(remote_id = %sub.remote_id, "created webhook subscription");
        Ok(SubscriptionOutcome::Created(sub))
    }
}
