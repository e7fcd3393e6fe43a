use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::event::EventType;
use crate::quiet_hours::parse_hhmm;
use crate::store::{KvStore, keys};

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreferences {
    pub push: bool,
    pub in_app: bool,
    pub email: bool,
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self {
            push: true,
            in_app: true,
            email: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    pub enabled: bool,
    /// "HH:MM" in the configured timezone. The window may cross
    /// midnight (start > end).
    pub start_time: String,
    pub end_time: String,
    /// IANA timezone name.
    pub timezone: String,
    pub except_critical: bool,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: "22:00".to_string(),
            end_time: "08:00".to_string(),
            timezone: "UTC".to_string(),
            except_critical: true,
        }
    }
}

/// Per (user, workspace) notification preferences. Created lazily with
/// defaults on first access; deleted when the user leaves the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub workspace_id: ObjectId,
    pub enabled: bool,
    #[serde(default)]
    pub event_settings: HashMap<EventType, bool>,
    #[serde(default)]
    pub channels: ChannelPreferences,
    #[serde(default)]
    pub quiet_hours: QuietHoursConfig,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Preferences {
    pub const COLLECTION: &'static str = "notification_preferences";

    pub fn defaults(user_id: ObjectId, workspace_id: ObjectId) -> Self {
        let now = DateTime::now();
        let mut prefs = Self {
            id: None,
            user_id,
            workspace_id,
            enabled: true,
            event_settings: HashMap::new(),
            channels: ChannelPreferences::default(),
            quiet_hours: QuietHoursConfig::default(),
            created_at: now,
            updated_at: now,
        };
        prefs.assert_invariants();
        prefs
    }

    /// Re-asserts the non-negotiable rules: critical types stay enabled
    /// and the in-app channel stays on.
    pub fn assert_invariants(&mut self) {
        for ty in EventType::CRITICAL {
            self.event_settings.insert(ty, true);
        }
        self.channels.in_app = true;
    }

    pub fn is_type_enabled(&self, notification_type: EventType) -> bool {
        if notification_type.is_critical() {
            return true;
        }
        if !self.enabled {
            return false;
        }
        self.event_settings
            .get(&notification_type)
            .copied()
            .unwrap_or(true)
    }
}

/// Partial update merged into the stored preferences.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesUpdate {
    pub enabled: Option<bool>,
    pub event_settings: Option<HashMap<EventType, bool>>,
    pub channels: Option<ChannelPreferencesUpdate>,
    pub quiet_hours: Option<QuietHoursUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelPreferencesUpdate {
    pub push: Option<bool>,
    pub in_app: Option<bool>,
    pub email: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuietHoursUpdate {
    pub enabled: Option<bool>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub timezone: Option<String>,
    pub except_critical: Option<bool>,
}

/// Narrow persistence seam; the MongoDB implementation lives in the
/// services crate.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn get(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
    ) -> EngineResult<Option<Preferences>>;

    async fn save(&self, prefs: &Preferences) -> EngineResult<()>;

    async fn delete(&self, user_id: ObjectId, workspace_id: ObjectId) -> EngineResult<()>;
}

pub struct PreferenceService {
    repo: Arc<dyn PreferenceRepository>,
    kv: Arc<dyn KvStore>,
}

impl PreferenceService {
    pub fn new(repo: Arc<dyn PreferenceRepository>, kv: Arc<dyn KvStore>) -> Self {
        Self { repo, kv }
    }

    /// Cached lookup; corrupt cache entries count as misses. Missing
    /// documents are created with defaults.
    pub async fn get_or_create(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
    ) -> EngineResult<Preferences> {
        let cache_key = keys::preferences(&user_id, &workspace_id);
        if let Ok(Some(raw)) = self.kv.get(&cache_key).await {
            match serde_json::from_str::<Preferences>(&raw) {
                Ok(prefs) => return Ok(prefs),
                Err(error) => {
                    warn!(%user_id, %workspace_id, %error, "Corrupt cached preferences, treating as miss");
                }
            }
        }

        let prefs = match self.repo.get(user_id, workspace_id).await? {
            Some(mut prefs) => {
                prefs.assert_invariants();
                prefs
            }
            None => {
                let prefs = Preferences::defaults(user_id, workspace_id);
                self.repo.save(&prefs).await?;
                prefs
            }
        };

        self.cache(&cache_key, &prefs).await;
        Ok(prefs)
    }

    /// Merges a partial update and re-asserts the invariants before
    /// persisting.
    pub async fn update(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
        update: PreferencesUpdate,
    ) -> EngineResult<Preferences> {
        let mut prefs = self.get_or_create(user_id, workspace_id).await?;

        if let Some(enabled) = update.enabled {
            prefs.enabled = enabled;
        }
        if let Some(event_settings) = update.event_settings {
            for (ty, on) in event_settings {
                prefs.event_settings.insert(ty, on);
            }
        }
        if let Some(channels) = update.channels {
            if let Some(push) = channels.push {
                prefs.channels.push = push;
            }
            if let Some(in_app) = channels.in_app {
                prefs.channels.in_app = in_app;
            }
            if let Some(email) = channels.email {
                prefs.channels.email = email;
            }
        }
        if let Some(quiet) = update.quiet_hours {
            if let Some(enabled) = quiet.enabled {
                prefs.quiet_hours.enabled = enabled;
            }
            if let Some(start) = quiet.start_time {
                if parse_hhmm(&start).is_none() {
                    return Err(EngineError::Validation(format!(
                        "invalid start_time '{start}', expected HH:MM"
                    )));
                }
                prefs.quiet_hours.start_time = start;
            }
            if let Some(end) = quiet.end_time {
                if parse_hhmm(&end).is_none() {
                    return Err(EngineError::Validation(format!(
                        "invalid end_time '{end}', expected HH:MM"
                    )));
                }
                prefs.quiet_hours.end_time = end;
            }
            if let Some(timezone) = quiet.timezone {
                if timezone.parse::<chrono_tz::Tz>().is_err() {
                    return Err(EngineError::Validation(format!(
                        "'{timezone}' is not a valid IANA timezone"
                    )));
                }
                prefs.quiet_hours.timezone = timezone;
            }
            if let Some(except_critical) = quiet.except_critical {
                prefs.quiet_hours.except_critical = except_critical;
            }
        }

        prefs.assert_invariants();
        prefs.updated_at = DateTime::now();
        self.repo.save(&prefs).await?;
        self.cache(&keys::preferences(&user_id, &workspace_id), &prefs)
            .await;
        Ok(prefs)
    }

    pub async fn is_type_enabled(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
        notification_type: EventType,
    ) -> EngineResult<bool> {
        let prefs = self.get_or_create(user_id, workspace_id).await?;
        Ok(prefs.is_type_enabled(notification_type))
    }

    pub async fn channel_preferences(
        &self,
        user_id: ObjectId,
        workspace_id: ObjectId,
    ) -> EngineResult<ChannelPreferences> {
        let prefs = self.get_or_create(user_id, workspace_id).await?;
        Ok(prefs.channels)
    }

    /// Removes the document and its cache entry when a user leaves a
    /// workspace.
    pub async fn delete(&self, user_id: ObjectId, workspace_id: ObjectId) -> EngineResult<()> {
        self.repo.delete(user_id, workspace_id).await?;
        self.kv
            .del(&keys::preferences(&user_id, &workspace_id))
            .await?;
        Ok(())
    }

    async fn cache(&self, cache_key: &str, prefs: &Preferences) {
        match serde_json::to_string(prefs) {
            Ok(raw) => {
                if let Err(error) = self.kv.set_ex(cache_key, &raw, CACHE_TTL).await {
                    warn!(%error, "Failed to cache preferences");
                }
            }
            Err(error) => warn!(%error, "Failed to serialize preferences for cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;
    use dashmap::DashMap;

    #[derive(Default)]
    struct MemoryPreferenceRepository {
        docs: DashMap<(ObjectId, ObjectId), Preferences>,
    }

    #[async_trait]
    impl PreferenceRepository for MemoryPreferenceRepository {
        async fn get(
            &self,
            user_id: ObjectId,
            workspace_id: ObjectId,
        ) -> EngineResult<Option<Preferences>> {
            Ok(self.docs.get(&(user_id, workspace_id)).map(|p| p.clone()))
        }

        async fn save(&self, prefs: &Preferences) -> EngineResult<()> {
            self.docs
                .insert((prefs.user_id, prefs.workspace_id), prefs.clone());
            Ok(())
        }

        async fn delete(&self, user_id: ObjectId, workspace_id: ObjectId) -> EngineResult<()> {
            self.docs.remove(&(user_id, workspace_id));
            Ok(())
        }
    }

    fn service() -> (PreferenceService, Arc<MemoryPreferenceRepository>) {
        let repo = Arc::new(MemoryPreferenceRepository::default());
        let kv = Arc::new(MemoryKvStore::new());
        (PreferenceService::new(repo.clone(), kv), repo)
    }

    #[tokio::test]
    async fn lazily_creates_defaults() {
        let (service, repo) = service();
        let user = ObjectId::new();
        let ws = ObjectId::new();
        let prefs = service.get_or_create(user, ws).await.unwrap();
        assert!(prefs.enabled);
        assert!(prefs.channels.in_app);
        assert_eq!(repo.docs.len(), 1);
    }

    #[tokio::test]
    async fn critical_types_cannot_be_disabled() {
        let (service, _) = service();
        let user = ObjectId::new();
        let ws = ObjectId::new();
        let update = PreferencesUpdate {
            event_settings: Some(HashMap::from([
                (EventType::DeploymentFailed, false),
                (EventType::StoryCompleted, false),
            ])),
            ..Default::default()
        };
        let prefs = service.update(user, ws, update).await.unwrap();
        assert!(prefs.is_type_enabled(EventType::DeploymentFailed));
        assert!(!prefs.is_type_enabled(EventType::StoryCompleted));
    }

    #[tokio::test]
    async fn in_app_channel_cannot_be_disabled() {
        let (service, _) = service();
        let update = PreferencesUpdate {
            channels: Some(ChannelPreferencesUpdate {
                push: Some(false),
                in_app: Some(false),
                email: None,
            }),
            ..Default::default()
        };
        let prefs = service
            .update(ObjectId::new(), ObjectId::new(), update)
            .await
            .unwrap();
        assert!(!prefs.channels.push);
        assert!(prefs.channels.in_app);
    }

    #[tokio::test]
    async fn global_disable_silences_non_critical_only() {
        let (service, _) = service();
        let user = ObjectId::new();
        let ws = ObjectId::new();
        let update = PreferencesUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        service.update(user, ws, update).await.unwrap();
        assert!(
            !service
                .is_type_enabled(user, ws, EventType::StoryCompleted)
                .await
                .unwrap()
        );
        assert!(
            service
                .is_type_enabled(user, ws, EventType::AgentError)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn rejects_malformed_quiet_hours() {
        let (service, _) = service();
        let update = PreferencesUpdate {
            quiet_hours: Some(QuietHoursUpdate {
                start_time: Some("25:99".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = service
            .update(ObjectId::new(), ObjectId::new(), update)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_unknown_timezone() {
        let (service, _) = service();
        let update = PreferencesUpdate {
            quiet_hours: Some(QuietHoursUpdate {
                timezone: Some("Mars/Olympus_Mons".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = service
            .update(ObjectId::new(), ObjectId::new(), update)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let (service, repo) = service();
        let user = ObjectId::new();
        let ws = ObjectId::new();
        service.get_or_create(user, ws).await.unwrap();
        service.delete(user, ws).await.unwrap();
        assert!(repo.docs.is_empty());
    }
}
