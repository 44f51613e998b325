use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    cache::product_key,
    core::{app_error::AppError, app_state::AppState},
    models::{CategoryEntity, ProductEntity, TopCategoryEntity},
    schema::{categories, product_categories, products, top_categories},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_categories))
        .routes(utoipa_axum::routes!(get_top_categories))
        .routes(utoipa_axum::routes!(get_products))
        .routes(utoipa_axum::routes!(product_detail))
}

/// List every category.
#[utoipa::path(
    get,
    path = "/categories/",
    tags = ["Catalog"],
    responses(
        (status = 200, description = "All categories", body = Vec<CategoryEntity>)
    )
)]
async fn get_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let list: Vec<CategoryEntity> = categories::table
        .select(CategoryEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get categories")?;

    Ok(Json(list))
}

#[derive(Serialize, ToSchema)]
struct TopCategoryRes {
    id: i32,
    name: String,
    slug: String,
    image: String,
    products: Vec<ProductEntity>,
}

/// The three most purchased categories, each with its ten best-rated
/// products.
#[utoipa::path(
    get,
    path = "/top_categories/",
    tags = ["Catalog"],
    responses(
        (status = 200, description = "Top categories with their top products", body = Vec<TopCategoryRes>)
    )
)]
async fn get_top_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let top: Vec<(TopCategoryEntity, CategoryEntity)> = top_categories::table
        .inner_join(categories::table)
        .order_by(top_categories::total_purchases.desc())
        .limit(3)
        .select((TopCategoryEntity::as_select(), CategoryEntity::as_select()))
        .get_results(conn)
        .await
        .context("Failed to get top categories")?;

    let mut list = Vec::with_capacity(top.len());
    for (_, category) in top {
        let top_products: Vec<ProductEntity> = product_categories::table
            .inner_join(products::table)
            .filter(product_categories::category_id.eq(category.id))
            .order_by(products::rating.desc())
            .limit(10)
            .select(ProductEntity::as_select())
            .get_results(conn)
            .await
            .context("Failed to get top products")?;

        list.push(TopCategoryRes {
            id: category.id,
            name: category.name,
            slug: category.slug,
            image: category.image,
            products: top_products,
        });
    }

    Ok(Json(list))
}

/// List the products belonging to a category.
#[utoipa::path(
    get,
    path = "/products/{category_slug}/",
    tags = ["Catalog"],
    params(
        ("category_slug" = String, Path, description = "Category slug to list products for")
    ),
    responses(
        (status = 200, description = "Products in the category", body = Vec<ProductEntity>)
    )
)]
async fn get_products(
    Path(category_slug): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let list: Vec<ProductEntity> = product_categories::table
        .inner_join(products::table)
        .inner_join(categories::table)
        .filter(categories::slug.eq(&category_slug))
        .select(ProductEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get products")?;

    Ok(Json(list))
}

/// Product detail payload; `description` is normalized so clients always
/// receive an array of paragraphs.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
struct ProductRes {
    id: i32,
    name: String,
    slug: String,
    description: Option<Value>,
    price: f32,
    rating: f32,
    fast_delivery: bool,
    in_stock: bool,
    quantity: i32,
    seller: String,
    image: String,
}

impl From<ProductEntity> for ProductRes {
    fn from(product: ProductEntity) -> Self {
        Self {
            id: product.id,
            name: product.name,
            slug: product.slug,
            description: normalize_description(product.description),
            price: product.price,
            rating: product.rating,
            fast_delivery: product.fast_delivery,
            in_stock: product.in_stock,
            quantity: product.quantity,
            seller: product.seller,
            image: product.image,
        }
    }
}

/// Wraps a scalar description into a one-element array; descriptions
/// authored as arrays pass through untouched.
fn normalize_description(description: Option<Value>) -> Option<Value> {
    description.map(|value| match value {
        Value::Array(_) => value,
        other => Value::Array(vec![other]),
    })
}

/// Fetch one product by slug (cached).
#[utoipa::path(
    get,
    path = "/product/{slug}/",
    tags = ["Catalog"],
    params(
        ("slug" = String, Path, description = "Product slug")
    ),
    responses(
        (status = 200, description = "Product detail", body = ProductRes),
        (status = 404, description = "Unknown slug")
    )
)]
async fn product_detail(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let key = product_key(&slug);
    if let Some(product) = state.cache.get_json::<ProductRes>(&key).await {
        return Ok(Json(product));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product: Option<ProductEntity> = products::table
        .filter(products::slug.eq(&slug))
        .select(ProductEntity::as_select())
        .first(conn)
        .await
        .optional()
        .context("Failed to get product")?;

    let Some(product) = product else {
        return Err(AppError::NotFound);
    };

    let res = ProductRes::from(product);
    state.cache.put_json(key, &res).await?;

    Ok(Json(res))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_description_is_wrapped_into_an_array() {
        let normalized = normalize_description(Some(json!("a single paragraph")));
        assert_eq!(normalized, Some(json!(["a single paragraph"])));
    }

    #[test]
    fn array_description_passes_through() {
        let normalized = normalize_description(Some(json!(["one", "two"])));
        assert_eq!(normalized, Some(json!(["one", "two"])));
    }

    #[test]
    fn missing_description_stays_missing() {
        assert_eq!(normalize_description(None), None);
    }
}
