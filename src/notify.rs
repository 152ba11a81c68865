//! Direct-first notification delivery with per-recipient channel fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::gateway::{Gateway, GatewayError, Identity};

/// How a notification reached (or failed to reach) its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Private message accepted.
    Direct,
    /// Recipient refuses private messages; posted into a shared chat instead.
    Fallback { channel_id: i64 },
    Failed,
}

impl DeliveryResult {
    pub fn is_delivered(self) -> bool {
        !matches!(self, DeliveryResult::Failed)
    }
}

pub struct Notifier {
    gateway: Arc<dyn Gateway>,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Deliver `payload` to `recipient`. Never returns an error: every
    /// failure is logged and reported as [`DeliveryResult::Failed`].
    ///
    /// Only a refused private message triggers the fallback, which tries
    /// `fallback_channels` in order with the recipient mentioned.
    pub async fn deliver(
        &self,
        recipient: &Identity,
        payload: &str,
        fallback_channels: &[i64],
    ) -> DeliveryResult {
        match self.gateway.send_direct(recipient.user_id, payload).await {
            Ok(()) => {
                debug!("DM delivered to {}", recipient.user_id);
                return DeliveryResult::Direct;
            }
            Err(GatewayError::PermissionDenied(e)) => {
                info!("DM to {} refused ({}), trying shared chats", recipient.user_id, e);
            }
            Err(e) => {
                warn!("DM to {} failed: {}", recipient.user_id, e);
                return DeliveryResult::Failed;
            }
        }

        let addressed = format!("{}\n{}", recipient.mention(), payload);
        for &channel_id in fallback_channels {
            match self.gateway.send_to_channel(channel_id, &addressed).await {
                Ok(()) => {
                    info!("Delivered to {} via chat {}", recipient.user_id, channel_id);
                    return DeliveryResult::Fallback { channel_id };
                }
                Err(e) => warn!("Fallback to chat {} for {} failed: {}", channel_id, recipient.user_id, e),
            }
        }

        warn!("No route left for {}", recipient.user_id);
        DeliveryResult::Failed
    }
}
