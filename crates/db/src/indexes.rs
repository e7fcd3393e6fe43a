use mongodb::{Database, IndexModel, options::IndexOptions};
use tracing::info;

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Notifications
    create_indexes(
        db,
        "notifications",
        vec![
            index(bson::doc! { "user_id": 1, "is_read": 1, "created_at": -1 }),
            index(bson::doc! { "workspace_id": 1, "user_id": 1, "created_at": -1 }),
        ],
    )
    .await?;

    // Notification Preferences
    create_indexes(
        db,
        "notification_preferences",
        vec![index_unique(bson::doc! { "user_id": 1, "workspace_id": 1 })],
    )
    .await?;

    // Webhook Integrations
    create_indexes(
        db,
        "webhook_integrations",
        vec![
            index_unique(bson::doc! { "workspace_id": 1, "provider": 1 }),
            index(bson::doc! { "workspace_id": 1, "status": 1 }),
        ],
    )
    .await?;

    // Workspace Members
    create_indexes(
        db,
        "workspace_members",
        vec![
            index_unique(bson::doc! { "workspace_id": 1, "user_id": 1 }),
            index(bson::doc! { "user_id": 1 }),
        ],
    )
    .await?;

    // Project Members
    create_indexes(
        db,
        "project_members",
        vec![
            index_unique(bson::doc! { "project_id": 1, "user_id": 1 }),
            index(bson::doc! { "workspace_id": 1, "user_id": 1 }),
        ],
    )
    .await?;

    // Push Subscriptions
    create_indexes(
        db,
        "push_subscriptions",
        vec![
            index_unique(bson::doc! { "user_id": 1, "endpoint": 1 }),
            index(bson::doc! { "user_id": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
