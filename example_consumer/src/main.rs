//! Example consumer: serves every table declared in `MODELS_DIR` as a resource
//! backed by Postgres.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use potion_rest::config::{load_models_from_dir, RelationshipConfig};
use potion_rest::{Api, ApiConfig, PostgresBackend, Relation, ResourceDefinition};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("potion_rest=info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/potion".into());
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let models_dir = std::env::var("MODELS_DIR").unwrap_or_else(|_| "models".into());
    let models = load_models_from_dir(&models_dir).await?;

    let mut api = Api::new(ApiConfig::from_env()?);
    for model in models {
        let mut definition = ResourceDefinition::named(&model.table);
        for relationship in &model.relationships {
            match relationship {
                RelationshipConfig::OneToMany { attribute, target_table, .. } => {
                    definition = definition.relation(Relation::new(attribute, target_table));
                }
                RelationshipConfig::ManyToMany { attribute, .. } => {
                    tracing::warn!(table = %model.table, attribute = %attribute, "many-to-many relation needs an explicit target; skipped");
                }
            }
        }
        api.add(definition.manager(PostgresBackend::new(pool.clone(), model)?))?;
    }

    let app = api.into_router()?;
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
