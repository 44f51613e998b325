use std::collections::HashSet;

use anyhow::Context;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    core::{app_error::AppError, app_state::AppState},
    identity::{self, Identity},
    models::{CreateOrderEntity, CreateOrderItemEntity, OrderEntity, OrderItemEntity, ProductEntity},
    schema::{order_items, orders, products},
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/order",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(place_order))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                identity::authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct PlaceOrderReq {
    user_id: Option<i32>,
    order: Option<PlaceOrderReqHeader>,
    order_items: Option<Vec<PlaceOrderReqItem>>,
}

#[derive(Deserialize, ToSchema)]
struct PlaceOrderReqHeader {
    shipping_address: String,
    payment_method: String,
    total_amount: f32,
}

#[derive(Deserialize, ToSchema)]
struct PlaceOrderReqItem {
    product_id: Option<i32>,
    #[serde(default)]
    price: f32,
    #[serde(default = "default_quantity")]
    quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Serialize, ToSchema)]
struct PlaceOrderRes {
    order_id: Uuid,
    total_amount: f32,
    created_at: DateTime<Utc>,
    shipping_address: String,
    payment_method: String,
    order_items: Vec<OrderItemRes>,
}

/// An order line annotated with the referenced product's display name and
/// slug, resolved at response time rather than stored redundantly.
#[derive(Serialize, ToSchema)]
struct OrderItemRes {
    product_id: i32,
    product_name: String,
    product_slug: String,
    price: f32,
    quantity: i32,
}

/// A line item that survived the request-shape check; price and quantity
/// are purchase-time snapshots, not live product values.
#[derive(Debug, PartialEq)]
struct OrderCandidate {
    product_id: i32,
    price: f32,
    quantity: i32,
}

/// Drops entries that do not reference a product.
fn build_candidates(items: &[PlaceOrderReqItem]) -> Vec<OrderCandidate> {
    items
        .iter()
        .filter_map(|item| {
            item.product_id.map(|product_id| OrderCandidate {
                product_id,
                price: item.price,
                quantity: item.quantity,
            })
        })
        .collect()
}

/// Keeps only candidates whose product exists in the catalog.
fn keep_valid(candidates: Vec<OrderCandidate>, valid_ids: &HashSet<i32>) -> Vec<OrderCandidate> {
    candidates
        .into_iter()
        .filter(|candidate| valid_ids.contains(&candidate.product_id))
        .collect()
}

/// Place a multi-item order.
///
/// Two-phase validate-then-commit: line items referencing unknown products
/// are dropped silently, but the order header is never persisted unless at
/// least one item survives validation.
#[utoipa::path(
    post,
    path = "/place/",
    tags = ["Orders"],
    request_body = PlaceOrderReq,
    responses(
        (status = 200, description = "Created order with its persisted items", body = PlaceOrderRes),
        (status = 400, description = "Missing header, empty item list, or no valid items")
    )
)]
async fn place_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<PlaceOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;

    let header = body
        .order
        .ok_or_else(|| AppError::BadRequest("Missing order header".into()))?;
    let items = body.order_items.unwrap_or_default();
    if items.is_empty() {
        return Err(AppError::BadRequest("Empty order item list".into()));
    }

    let candidates = build_candidates(&items);
    if candidates.is_empty() {
        return Err(AppError::BadRequest(
            "No order items referencing a product".into(),
        ));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let candidate_ids: Vec<i32> = candidates.iter().map(|item| item.product_id).collect();
    let valid_ids: HashSet<i32> = products::table
        .filter(products::id.eq_any(&candidate_ids))
        .select(products::id)
        .get_results::<i32>(conn)
        .await
        .context("Failed to validate order products")?
        .into_iter()
        .collect();

    let valid_items = keep_valid(candidates, &valid_ids);
    if valid_items.is_empty() {
        return Err(AppError::BadRequest(
            "No order items reference an existing product".into(),
        ));
    }

    let order_id = Uuid::new_v4();
    let order = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        order_id,
                        user_id,
                        total_amount: header.total_amount,
                        payment_method: header.payment_method,
                        shipping_address: header.shipping_address,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                // A product id repeated in the payload trips the
                // (order_id, product_id) constraint; keep the first row.
                let rows: Vec<CreateOrderItemEntity> = valid_items
                    .into_iter()
                    .map(|item| CreateOrderItemEntity {
                        order_id,
                        product_id: item.product_id,
                        price: item.price,
                        quantity: item.quantity,
                    })
                    .collect();

                diesel::insert_into(order_items::table)
                    .values(rows)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await
                    .context("Failed to create order items")?;

                Ok::<OrderEntity, AppError>(order)
            })
        })
        .await?;

    let persisted: Vec<(OrderItemEntity, ProductEntity)> = order_items::table
        .inner_join(products::table)
        .filter(order_items::order_id.eq(order.order_id))
        .select((OrderItemEntity::as_select(), ProductEntity::as_select()))
        .get_results(conn)
        .await
        .context("Failed to get persisted order items")?;

    let order_items = persisted
        .into_iter()
        .map(|(item, product)| OrderItemRes {
            product_id: item.product_id,
            product_name: product.name,
            product_slug: product.slug,
            price: item.price,
            quantity: item.quantity,
        })
        .collect();

    Ok(Json(PlaceOrderRes {
        order_id: order.order_id,
        total_amount: order.total_amount,
        created_at: order.created_at,
        shipping_address: order.shipping_address,
        payment_method: order.payment_method,
        order_items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_item(product_id: Option<i32>, price: f32, quantity: i32) -> PlaceOrderReqItem {
        PlaceOrderReqItem {
            product_id,
            price,
            quantity,
        }
    }

    #[test]
    fn candidates_skip_entries_without_a_product_id() {
        let items = vec![
            req_item(Some(1), 10.0, 2),
            req_item(None, 5.0, 1),
            req_item(Some(2), 3.5, 4),
        ];

        let candidates = build_candidates(&items);
        assert_eq!(
            candidates,
            vec![
                OrderCandidate {
                    product_id: 1,
                    price: 10.0,
                    quantity: 2
                },
                OrderCandidate {
                    product_id: 2,
                    price: 3.5,
                    quantity: 4
                },
            ]
        );
    }

    #[test]
    fn candidates_keep_snapshot_price_and_quantity() {
        let candidates = build_candidates(&[req_item(Some(7), 99.99, 3)]);
        assert_eq!(candidates[0].price, 99.99);
        assert_eq!(candidates[0].quantity, 3);
    }

    #[test]
    fn validation_drops_unknown_products_but_keeps_the_rest() {
        let valid: HashSet<i32> = [1].into_iter().collect();
        let candidates = vec![
            OrderCandidate {
                product_id: 1,
                price: 10.0,
                quantity: 2,
            },
            OrderCandidate {
                product_id: 999_999,
                price: 5.0,
                quantity: 1,
            },
        ];

        let survivors = keep_valid(candidates, &valid);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].product_id, 1);
    }

    #[test]
    fn validation_of_all_unknown_products_leaves_nothing() {
        let valid = HashSet::new();
        let candidates = vec![OrderCandidate {
            product_id: 42,
            price: 1.0,
            quantity: 1,
        }];
        assert!(keep_valid(candidates, &valid).is_empty());
    }
}
