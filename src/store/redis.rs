//! Redis-backed email index
//!
//! Thin adapter over the durable index. Every write is best-effort:
//! the SMTP reply never depends on the outcome, callers only log
//! failures. Records expire after 24 hours, matching the disposable
//! mailbox lifetime.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::mime::types::Email;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;
use tracing::{debug, error, info, warn};

const EMAIL_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify reachability with a PING.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = if config.redis_password.is_empty() {
            format!("redis://{}/", config.redis_addr)
        } else {
            format!("redis://:{}@{}/", config.redis_password, config.redis_addr)
        };

        let client = redis::Client::open(url)?;
        let mut manager = ConnectionManager::new(client).await?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut manager)
            .await?;
        info!("Redis connection successful");

        Ok(Self { manager })
    }

    fn email_key(id: &str) -> String {
        format!("nullmail:email:{id}")
    }

    fn recipient_key(address: &str) -> String {
        format!("emails:{address}")
    }

    fn queue_key(name: &str) -> String {
        format!("nullmail:queue:{name}")
    }

    fn stats_key(name: &str) -> String {
        format!("nullmail:stats:{name}")
    }

    /// Persist the email record and index its id under each recipient.
    pub async fn store_email_with_recipients(
        &self,
        id: &str,
        record: &serde_json::Value,
        recipients: &[String],
    ) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut con = self.manager.clone();

        let _: () = con.set_ex(Self::email_key(id), payload, EMAIL_TTL_SECS).await?;
        let _: () = con.lpush("nullmail:emails", id).await?;

        for recipient in recipients {
            let key = Self::recipient_key(recipient);
            if let Err(e) = con.lpush::<_, _, ()>(&key, id).await {
                error!("Failed to index email for recipient {}: {}", recipient, e);
                continue;
            }
            if let Err(e) = con.expire::<_, ()>(&key, EMAIL_TTL_SECS as i64).await {
                warn!("Failed to set TTL for recipient list {}: {}", recipient, e);
            }
            debug!("Email {} indexed for recipient {}", id, recipient);
        }

        info!("Email stored with recipient indexing: {}", id);
        Ok(())
    }

    /// Append the record to a processing queue.
    pub async fn queue_email(&self, queue: &str, record: &serde_json::Value) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let mut con = self.manager.clone();
        let _: () = con.lpush(Self::queue_key(queue), payload).await?;
        debug!("Email queued on {}", queue);
        Ok(())
    }

    /// Bump a monotonic statistics counter.
    pub async fn increment_counter(&self, name: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.incr(Self::stats_key(name), 1).await?;
        Ok(())
    }
}

/// The JSON document stored under the primary key and on the queue:
/// the parsed email plus the envelope it arrived with.
pub fn email_record(email: &Email, from: &str, recipients: &[String]) -> serde_json::Value {
    json!({
        "id": email.id,
        "from": from,
        "recipients": recipients,
        "subject": email.subject,
        "body": email.body,
        "headers": email.headers,
        "attachments": email.attachments,
        "received_at": email.received_at,
        "size": email.size,
        "is_utf8": email.is_utf8,
    })
}
