use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineResult;
use crate::event::{EventType, NotificationEvent, Recipient};
use crate::preferences::QuietHoursConfig;
use crate::store::{KvStore, keys};

/// Retention ceiling for held notifications: protects against indefinite
/// accumulation if a user never leaves quiet hours.
const HOLD_TTL: Duration = Duration::from_secs(43_200);

/// Parses "HH:MM" into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Option<u32> {
    let (hours, minutes) = value.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Membership of `now` in `[start, end)`, all "HH:MM" strings, where
/// `start > end` denotes a window crossing midnight (22:00-08:00
/// contains 23:00 and 03:00 but not 12:00). Unparseable inputs fail
/// open: not inside the window.
pub fn is_time_between(now: &str, start: &str, end: &str) -> bool {
    let (Some(now), Some(start), Some(end)) = (parse_hhmm(now), parse_hhmm(start), parse_hhmm(end))
    else {
        return false;
    };
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Whether `now` falls inside the configured suppression window,
/// evaluated in the configured IANA timezone. Invalid timezones fail
/// open (never suppress).
pub fn is_in_quiet_hours_at(config: &QuietHoursConfig, now: DateTime<Utc>) -> bool {
    if !config.enabled {
        return false;
    }
    let tz: Tz = match config.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %config.timezone, "Invalid quiet-hours timezone, failing open");
            return false;
        }
    };
    let local = now.with_timezone(&tz);
    let now_hm = format!("{:02}:{:02}", local.hour(), local.minute());
    is_time_between(&now_hm, &config.start_time, &config.end_time)
}

/// Only the fixed critical set ever bypasses suppression; the
/// `except_critical` preference cannot widen the bypass to other types.
pub fn should_bypass_quiet_hours(notification_type: EventType, _except_critical: bool) -> bool {
    notification_type.is_critical()
}

#[derive(Debug, Clone, Serialize)]
pub struct QuietHoursStatus {
    pub in_quiet_hours: bool,
    pub ends_at: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
}

/// When the active window ends, rolled to the next day if the window
/// crosses midnight and `now` is already past today's start.
pub fn status_at(config: &QuietHoursConfig, now: DateTime<Utc>) -> QuietHoursStatus {
    if !is_in_quiet_hours_at(config, now) {
        return QuietHoursStatus {
            in_quiet_hours: false,
            ends_at: None,
            timezone: None,
        };
    }

    // enabled + inside the window implies the config parsed once already
    let ends_at = config
        .timezone
        .parse::<Tz>()
        .ok()
        .and_then(|tz| end_of_window(config, now, tz));

    QuietHoursStatus {
        in_quiet_hours: true,
        ends_at,
        timezone: Some(config.timezone.clone()),
    }
}

fn end_of_window(config: &QuietHoursConfig, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let start = parse_hhmm(&config.start_time)?;
    let end = parse_hhmm(&config.end_time)?;
    let local = now.with_timezone(&tz);
    let now_minutes = local.hour() * 60 + local.minute();

    let crosses_midnight = start > end;
    let mut end_date = local.date_naive();
    if crosses_midnight && now_minutes >= start {
        end_date = end_date.succ_opt()?;
    }

    let end_local = tz
        .with_ymd_and_hms(
            end_date.year(),
            end_date.month(),
            end_date.day(),
            end / 60,
            end % 60,
            0,
        )
        .single()?;
    Some(end_local.with_timezone(&Utc))
}

/// A suppressed notification held until the user's window ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub notification_type: EventType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub workspace_id: ObjectId,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestSummary {
    pub title: String,
    pub body: String,
    pub count: usize,
    pub by_type: HashMap<String, u32>,
}

/// Timezone-aware suppression window plus the hold queue for notifications
/// suppressed by it.
pub struct QuietHoursEngine {
    kv: Arc<dyn KvStore>,
}

impl QuietHoursEngine {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn is_in_quiet_hours(&self, config: &QuietHoursConfig) -> bool {
        is_in_quiet_hours_at(config, Utc::now())
    }

    pub fn status(&self, config: &QuietHoursConfig) -> QuietHoursStatus {
        status_at(config, Utc::now())
    }

    /// Holds a suppressed notification for the recipient, keyed by
    /// (user, timestamp) with a 12-hour retention ceiling.
    pub async fn queue_for_later(
        &self,
        recipient: &Recipient,
        event: &NotificationEvent,
    ) -> EngineResult<()> {
        self.hold(
            recipient,
            event.notification_type,
            event.payload.clone(),
            Utc::now(),
        )
        .await
    }

    /// Raw hold primitive. The batch sweep uses it to park already
    /// buffered items under their original timestamps when it finds the
    /// user inside an active window.
    pub async fn hold(
        &self,
        recipient: &Recipient,
        notification_type: EventType,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<()> {
        let queued = QueuedNotification {
            notification_type,
            payload,
            timestamp,
            workspace_id: recipient.workspace_id,
        };
        let key = keys::quiet_hours(&recipient.user_id, timestamp.timestamp_millis());
        let raw = serde_json::to_string(&queued)?;
        self.kv.set_ex(&key, &raw, HOLD_TTL).await
    }

    /// Reads and deletes everything held for the user, sorted by
    /// timestamp. Corrupt entries are dropped with a warning.
    pub async fn flush_queued(&self, user_id: ObjectId) -> EngineResult<Vec<QueuedNotification>> {
        let prefix = keys::quiet_hours_prefix(&user_id);
        let mut items = Vec::new();
        for key in self.kv.scan_keys(&prefix).await? {
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<QueuedNotification>(&raw) {
                    Ok(item) => items.push(item),
                    Err(error) => {
                        warn!(%key, %error, "Dropping corrupt held notification");
                    }
                }
            }
            self.kv.del(&key).await?;
        }
        items.sort_by_key(|item| item.timestamp);
        Ok(items)
    }

    /// Oldest held notification without consuming the queue.
    pub async fn first_queued(&self, user_id: ObjectId) -> EngineResult<Option<QueuedNotification>> {
        let prefix = keys::quiet_hours_prefix(&user_id);
        for key in self.kv.scan_keys(&prefix).await? {
            if let Some(raw) = self.kv.get(&key).await?
                && let Ok(item) = serde_json::from_str::<QueuedNotification>(&raw)
            {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Users currently holding at least one suppressed notification.
    pub async fn users_with_queued(&self) -> EngineResult<Vec<ObjectId>> {
        let mut users = Vec::new();
        for key in self.kv.scan_keys(keys::QUIET_HOURS_PREFIX).await? {
            let Some(rest) = key.strip_prefix(keys::QUIET_HOURS_PREFIX) else {
                continue;
            };
            let Some((hex, _)) = rest.split_once(':') else {
                continue;
            };
            if let Ok(user_id) = ObjectId::parse_str(hex)
                && !users.contains(&user_id)
            {
                users.push(user_id);
            }
        }
        Ok(users)
    }

    /// Single human-readable summary of everything that was held.
    pub fn build_digest_summary(&self, items: &[QueuedNotification]) -> DigestSummary {
        let mut by_type: HashMap<String, u32> = HashMap::new();
        for item in items {
            *by_type
                .entry(item.notification_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let title = if items.len() == 1 {
            "1 notification while you were away".to_string()
        } else {
            format!("{} notifications while you were away", items.len())
        };

        let mut parts: Vec<(EventType, u32)> = Vec::new();
        for item in items {
            match parts.iter_mut().find(|(ty, _)| *ty == item.notification_type) {
                Some((_, n)) => *n += 1,
                None => parts.push((item.notification_type, 1)),
            }
        }
        let body = parts
            .iter()
            .map(|(ty, n)| format!("{}× {}", n, ty.label()))
            .collect::<Vec<_>>()
            .join(", ");

        DigestSummary {
            title,
            body,
            count: items.len(),
            by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_crossing_midnight() {
        assert!(is_time_between("23:00", "22:00", "08:00"));
        assert!(is_time_between("03:00", "22:00", "08:00"));
        assert!(!is_time_between("12:00", "22:00", "08:00"));
    }

    #[test]
    fn boundaries_are_start_inclusive_end_exclusive() {
        assert!(is_time_between("09:00", "09:00", "17:00"));
        assert!(!is_time_between("17:00", "09:00", "17:00"));
        assert!(is_time_between("22:00", "22:00", "08:00"));
        assert!(!is_time_between("08:00", "22:00", "08:00"));
    }

    #[test]
    fn unparseable_times_fail_open() {
        assert!(!is_time_between("banana", "22:00", "08:00"));
        assert!(!is_time_between("23:00", "25:00", "08:00"));
    }

    #[test]
    fn quiet_hours_respect_timezone() {
        let config = QuietHoursConfig {
            enabled: true,
            start_time: "22:00".to_string(),
            end_time: "08:00".to_string(),
            timezone: "America/New_York".to_string(),
            except_critical: true,
        };
        // 03:00 UTC == 23:00 EDT (UTC-4) -> inside
        let inside = Utc.with_ymd_and_hms(2025, 7, 1, 3, 0, 0).unwrap();
        assert!(is_in_quiet_hours_at(&config, inside));
        // 16:00 UTC == 12:00 EDT -> outside
        let outside = Utc.with_ymd_and_hms(2025, 7, 1, 16, 0, 0).unwrap();
        assert!(!is_in_quiet_hours_at(&config, outside));
    }

    #[test]
    fn disabled_config_never_suppresses() {
        let config = QuietHoursConfig {
            enabled: false,
            ..QuietHoursConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 23, 0, 0).unwrap();
        assert!(!is_in_quiet_hours_at(&config, now));
    }

    #[test]
    fn invalid_timezone_fails_open() {
        let config = QuietHoursConfig {
            enabled: true,
            timezone: "Nowhere/Null".to_string(),
            ..QuietHoursConfig::default()
        };
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 23, 0, 0).unwrap();
        assert!(!is_in_quiet_hours_at(&config, now));
    }

    #[test]
    fn ends_at_rolls_to_next_day_past_midnight_crossing_start() {
        let config = QuietHoursConfig {
            enabled: true,
            start_time: "22:00".to_string(),
            end_time: "08:00".to_string(),
            timezone: "UTC".to_string(),
            except_critical: true,
        };
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 23, 0, 0).unwrap();
        let status = status_at(&config, now);
        assert!(status.in_quiet_hours);
        assert_eq!(
            status.ends_at,
            Some(Utc.with_ymd_and_hms(2025, 7, 2, 8, 0, 0).unwrap())
        );

        // Early morning, already on the end's day: no roll.
        let morning = Utc.with_ymd_and_hms(2025, 7, 2, 3, 0, 0).unwrap();
        let status = status_at(&config, morning);
        assert_eq!(
            status.ends_at,
            Some(Utc.with_ymd_and_hms(2025, 7, 2, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn only_critical_types_bypass() {
        assert!(should_bypass_quiet_hours(EventType::DeploymentFailed, true));
        assert!(should_bypass_quiet_hours(EventType::AgentError, false));
        assert!(!should_bypass_quiet_hours(EventType::StoryCompleted, true));
        assert!(!should_bypass_quiet_hours(EventType::CostAlert, false));
    }

    #[tokio::test]
    async fn hold_flush_and_digest() {
        use crate::store::MemoryKvStore;

        let engine = QuietHoursEngine::new(Arc::new(MemoryKvStore::new()));
        let user = ObjectId::new();
        let ws = ObjectId::new();
        let recipient = Recipient {
            user_id: user,
            workspace_id: ws,
        };

        let story = NotificationEvent::new(
            EventType::StoryCompleted,
            serde_json::json!({"title": "Checkout flow"}),
            vec![recipient],
        );
        let cost = NotificationEvent::new(EventType::CostAlert, serde_json::json!({}), vec![recipient]);
        engine.queue_for_later(&recipient, &story).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        engine.queue_for_later(&recipient, &story).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        engine.queue_for_later(&recipient, &cost).await.unwrap();

        assert_eq!(engine.users_with_queued().await.unwrap(), vec![user]);

        let items = engine.flush_queued(user).await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let digest = engine.build_digest_summary(&items);
        assert_eq!(digest.count, 3);
        assert_eq!(digest.by_type.get("story_completed"), Some(&2));
        assert_eq!(digest.by_type.get("cost_alert"), Some(&1));
        assert!(digest.title.contains('3'));

        // Flush consumed everything.
        assert!(engine.flush_queued(user).await.unwrap().is_empty());
    }
}
