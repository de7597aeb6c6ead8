//! Example server: an in-memory library api with authors, books, a to-many
//! relation, an item attribute route and a custom route.
//!
//! Settings come from `API_*` variables (a `.env` file is read when present).

use potion_rest::{
    Api, ApiConfig, Field, ItemAttributeRoute, MemoryBackend, Relation, ResourceConfig, ResourceDefinition, Route,
    RouteRequest, SignalEvent, SignalKind,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("potion_rest=info".parse()?))
        .init();

    let config = ApiConfig::from_env()?;
    let mut api = Api::new(config);

    api.add(
        ResourceDefinition::new(ResourceConfig {
            name: "author".into(),
            title: Some("Author".into()),
            sort_attribute: Some("name".into()),
            natural_keys: vec![potion_rest::config::NaturalKeyConfig::Property("name".into())],
            ..Default::default()
        })
        .manager(MemoryBackend::new().unique("name"))
        .field("name", Field::string())
        .field("born", Field::integer().nullable()),
    )?;

    let count = Route::get("count", |request: RouteRequest| async move {
        let items = request.manager.instances(&[], &[]).await?;
        Ok(json!(items.len()))
    })
    .title("Number of books");

    api.add(
        ResourceDefinition::named("book")
            .manager(MemoryBackend::new().unique("isbn"))
            .field("title", Field::string())
            .field("year_published", Field::integer().nullable())
            .field("isbn", Field::string().nullable())
            .field("author", Field::to_one("author").nullable())
            .relation(Relation::new("co_authors", "author"))
            .item_attribute(ItemAttributeRoute::new("rating", Field::integer_between(Some(1), Some(5))))
            .route(count)
            .on(SignalKind::AfterCreate, |_, _, event| {
                if let SignalEvent::Create { item } = event {
                    tracing::info!(title = ?item.get("title"), "book added");
                }
                Ok(())
            }),
    )?;

    let app = api.into_router()?;
    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
