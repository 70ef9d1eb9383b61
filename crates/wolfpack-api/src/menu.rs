use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use wolfpack_types::api::{MenuCategory, MenuItem, MenuResponse};
use wolfpack_types::models::MenuKind;

use crate::auth::AppState;
use crate::util::{blocking, degraded, parse_id};

#[derive(Debug, Deserialize)]
pub struct MenuQuery {
    pub kind: Option<MenuKind>,
}

/// GET /menu — active categories with their items. Public and read-only.
pub async fn get_menu(
    State(state): State<AppState>,
    Query(query): Query<MenuQuery>,
) -> Json<MenuResponse> {
    let kind = query.kind;
    let result = blocking(&state, move |db| {
        let categories = db.list_menu_categories(kind.as_ref().map(MenuKind::as_str))?;
        let ids: Vec<String> = categories.iter().map(|c| c.id.clone()).collect();
        let items = db.get_menu_items(&ids)?;
        Ok((categories, items))
    })
    .await;

    let (category_rows, item_rows) = match result {
        Ok(rows) => rows,
        Err(e) => {
            return Json(MenuResponse {
                categories: vec![],
                message: degraded("menu", &e),
            });
        }
    };

    let mut items_by_category: HashMap<String, Vec<MenuItem>> = HashMap::new();
    for item in item_rows {
        items_by_category.entry(item.category_id).or_default().push(MenuItem {
            id: parse_id(&item.id, "menu item id"),
            name: item.name,
            description: item.description,
            price_cents: item.price_cents,
            is_available: item.is_available,
            image_url: item.image_url,
        });
    }

    let categories: Vec<MenuCategory> = category_rows
        .into_iter()
        .filter_map(|row| {
            Some(MenuCategory {
                kind: row.kind.parse().ok()?,
                id: parse_id(&row.id, "menu category id"),
                items: items_by_category.remove(&row.id).unwrap_or_default(),
                name: row.name,
                icon: row.icon,
                color: row.color,
            })
        })
        .collect();

    let item_count: usize = categories.iter().map(|c| c.items.len()).sum();
    Json(MenuResponse {
        message: format!("{} categories, {} items", categories.len(), item_count),
        categories,
    })
}
