use mongodb::{Client, Database, options::ClientOptions};
use tracing::info;

use beacon_config::Settings;

/// Parses the connection string, applies the configured pool bounds and
/// round-trips a ping against the target database before handing back
/// the handle.
pub async fn connect(settings: &Settings) -> Result<Database, mongodb::error::Error> {
    let mut options = ClientOptions::parse(&settings.database.url).await?;
    options.app_name = Some("beacon".to_string());
    options.max_pool_size = settings.database.max_pool_size.or(options.max_pool_size);
    options.min_pool_size = settings.database.min_pool_size.or(options.min_pool_size);

    let db = Client::with_options(options)?.database(&settings.database.name);
    db.run_command(bson::doc! { "ping": 1 }).await?;

    info!(
        db = %settings.database.name,
        max_pool = ?settings.database.max_pool_size,
        min_pool = ?settings.database.min_pool_size,
        "MongoDB connection established"
    );

    Ok(db)
}
