//! Route sets: to-many relations and single item attributes.

use super::{Route, RouteKind};
use crate::case::to_camel_case;
use crate::fields::Field;
use axum::http::Method;

/// GET, POST and DELETE routes for one to-many relation of an item.
///
/// Listings return links to the related items; POST adds one member and
/// returns its link; DELETE `/{target_id}` removes one (204 even when it was
/// not a member).
#[derive(Clone, Debug)]
pub struct Relation {
    attribute: String,
    target: String,
}

impl Relation {
    pub fn new(attribute: &str, target: &str) -> Self {
        Relation { attribute: attribute.to_string(), target: target.to_string() }
    }

    pub fn routes(&self) -> Vec<Route> {
        let attribute = self.attribute.as_str();
        let relation = |action: &str| RouteKind::from_relation(action, attribute, &self.target);
        vec![
            Route::with_kind(
                Method::GET,
                attribute,
                &to_camel_case(attribute),
                true,
                &[attribute],
                relation("instances"),
            ),
            Route::with_kind(
                Method::POST,
                &format!("{}_add", attribute),
                &to_camel_case(&format!("add_{}", attribute)),
                true,
                &[attribute],
                relation("add"),
            ),
            Route::with_kind(
                Method::DELETE,
                &format!("{}_remove", attribute),
                &to_camel_case(&format!("remove_{}", attribute)),
                true,
                &[attribute, "{target_id}"],
                relation("remove"),
            ),
        ]
    }
}

impl RouteKind {
    fn from_relation(action: &str, attribute: &str, target: &str) -> RouteKind {
        let (attribute, target) = (attribute.to_string(), target.to_string());
        match action {
            "add" => RouteKind::RelationAdd { attribute, target },
            "remove" => RouteKind::RelationRemove { attribute, target },
            _ => RouteKind::RelationInstances { attribute, target },
        }
    }
}

/// Reads (GET) and replaces (POST) one attribute of an item at `/{id}/{key}`.
#[derive(Clone, Debug)]
pub struct ItemAttributeRoute {
    key: String,
    field: Field,
    writable: bool,
}

impl ItemAttributeRoute {
    /// `field` converts the attribute; its `attribute` defaults to `key`.
    pub fn new(key: &str, field: Field) -> Self {
        let writable = !field.io.is_read_only();
        ItemAttributeRoute { key: key.to_string(), field, writable }
    }

    pub fn routes(&self) -> Vec<Route> {
        let key = self.key.as_str();
        let mut routes = vec![Route::with_kind(
            Method::GET,
            key,
            &to_camel_case(&format!("read_{}", key)),
            true,
            &[key],
            RouteKind::AttributeRead { key: self.key.clone(), field: self.field.clone() },
        )];
        if self.writable {
            routes.push(Route::with_kind(
                Method::POST,
                &format!("{}_update", key),
                &to_camel_case(&format!("update_{}", key)),
                true,
                &[key],
                RouteKind::AttributeWrite { key: self.key.clone(), field: self.field.clone() },
            ));
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_routes() {
        let routes = Relation::new("authors", "author").routes();
        let described: Vec<(String, String, String)> = routes
            .iter()
            .map(|r| (r.method.to_string(), r.pattern(), r.rel.clone()))
            .collect();
        assert_eq!(
            described,
            vec![
                ("GET".into(), "/{id}/authors".into(), "authors".into()),
                ("POST".into(), "/{id}/authors".into(), "addAuthors".into()),
                ("DELETE".into(), "/{id}/authors/{target_id}".into(), "removeAuthors".into()),
            ]
        );
        assert_eq!(routes[2].axum_path("/book"), "/book/:id/authors/:target_id");
        assert!(routes.iter().all(|r| r.target() == Some("author")));
    }

    #[test]
    fn read_only_attribute_has_no_post() {
        assert_eq!(ItemAttributeRoute::new("rating", Field::integer()).routes().len(), 2);
        let routes = ItemAttributeRoute::new("rating", Field::integer().read_only()).routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].rel, "readRating");
    }
}
