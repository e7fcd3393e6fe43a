use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use serde::Deserialize;

use crate::error::EngineResult;
use crate::event::Recipient;

/// Who an event is addressed to, as declared by its trigger producer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventScope {
    Workspace {
        workspace_id: ObjectId,
    },
    Project {
        workspace_id: ObjectId,
        project_id: ObjectId,
    },
    User {
        workspace_id: ObjectId,
        user_id: ObjectId,
    },
}

/// Membership lookups backing scope resolution. Implemented over MongoDB
/// in the services crate.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn workspace_member_ids(&self, workspace_id: ObjectId) -> EngineResult<Vec<ObjectId>>;

    async fn project_member_ids(&self, project_id: ObjectId) -> EngineResult<Vec<ObjectId>>;
}

/// Maps an event's scope to its `(user, workspace)` recipients. Pure
/// lookup, no state of its own.
pub struct RecipientResolver {
    members: Arc<dyn MembershipSource>,
}

impl RecipientResolver {
    pub fn new(members: Arc<dyn MembershipSource>) -> Self {
        Self { members }
    }

    pub async fn resolve(&self, scope: &EventScope) -> EngineResult<Vec<Recipient>> {
        let recipients = match scope {
            EventScope::Workspace { workspace_id } => self
                .members
                .workspace_member_ids(*workspace_id)
                .await?
                .into_iter()
                .map(|user_id| Recipient {
                    user_id,
                    workspace_id: *workspace_id,
                })
                .collect(),
            EventScope::Project {
                workspace_id,
                project_id,
            } => self
                .members
                .project_member_ids(*project_id)
                .await?
                .into_iter()
                .map(|user_id| Recipient {
                    user_id,
                    workspace_id: *workspace_id,
                })
                .collect(),
            EventScope::User {
                workspace_id,
                user_id,
            } => vec![Recipient {
                user_id: *user_id,
                workspace_id: *workspace_id,
            }],
        };

        let mut deduped: Vec<Recipient> = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if !deduped.contains(&recipient) {
                deduped.push(recipient);
            }
        }
        Ok(deduped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMembers {
        workspace: Vec<ObjectId>,
        project: Vec<ObjectId>,
    }

    #[async_trait]
    impl MembershipSource for FixedMembers {
        async fn workspace_member_ids(&self, _: ObjectId) -> EngineResult<Vec<ObjectId>> {
            Ok(self.workspace.clone())
        }

        async fn project_member_ids(&self, _: ObjectId) -> EngineResult<Vec<ObjectId>> {
            Ok(self.project.clone())
        }
    }

    #[tokio::test]
    async fn resolves_workspace_scope_with_dedup() {
        let user = ObjectId::new();
        let resolver = RecipientResolver::new(Arc::new(FixedMembers {
            workspace: vec![user, user],
            project: vec![],
        }));
        let ws = ObjectId::new();
        let recipients = resolver
            .resolve(&EventScope::Workspace { workspace_id: ws })
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].user_id, user);
        assert_eq!(recipients[0].workspace_id, ws);
    }

    #[tokio::test]
    async fn resolves_single_user_scope() {
        let resolver = RecipientResolver::new(Arc::new(FixedMembers {
            workspace: vec![],
            project: vec![],
        }));
        let ws = ObjectId::new();
        let user = ObjectId::new();
        let recipients = resolver
            .resolve(&EventScope::User {
                workspace_id: ws,
                user_id: user,
            })
            .await
            .unwrap();
        assert_eq!(
            recipients,
            vec![Recipient {
                user_id: user,
                workspace_id: ws
            }]
        );
    }
}
