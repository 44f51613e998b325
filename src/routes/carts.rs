use std::collections::HashSet;

use anyhow::Context;
use axum::{Extension, Json, extract::{Query, State}, response::IntoResponse};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    cache::cart_key,
    core::{
        aliases::DbConn,
        app_error::AppError,
        app_state::AppState,
    },
    identity::{self, Identity},
    models::{
        CartEntity, CartItemEntity, CreateCartEntity, CreateCartItemEntity, ProductEntity,
        UpdateCartItemChangeset,
    },
    schema::{cart_items, carts, products},
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/cart",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_cart_list))
            .routes(utoipa_axum::routes!(add_cart_item))
            .routes(utoipa_axum::routes!(merge_cart))
            .routes(utoipa_axum::routes!(update_cart_item))
            .routes(utoipa_axum::routes!(delete_cart_items))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                identity::authorization,
            )),
    )
}

/// A cart line as returned to clients: the row plus an embedded snapshot of
/// the referenced product.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct CartItemRes {
    pub id: i32,
    pub cart: i32,
    pub product: ProductEntity,
    pub quantity: i32,
    pub is_selected: bool,
}

impl CartItemRes {
    fn new(item: CartItemEntity, product: ProductEntity) -> Self {
        Self {
            id: item.id,
            cart: item.cart_id,
            product,
            quantity: item.quantity,
            is_selected: item.is_selected,
        }
    }
}

/// Loads the user's cart ordered by insertion time. A user without a cart
/// row simply has an empty list.
async fn load_cart_items(
    conn: &mut DbConn<'_>,
    user_id: i32,
) -> Result<Vec<CartItemRes>, AppError> {
    let rows: Vec<(CartItemEntity, ProductEntity)> = cart_items::table
        .inner_join(carts::table)
        .inner_join(products::table)
        .filter(carts::user_id.eq(user_id))
        .order_by(cart_items::created_at.asc())
        .select((CartItemEntity::as_select(), ProductEntity::as_select()))
        .get_results(conn)
        .await
        .context("Failed to get cart items")?;

    Ok(rows
        .into_iter()
        .map(|(item, product)| CartItemRes::new(item, product))
        .collect())
}

/// Returns the user's cart, creating the row on first use. A concurrent
/// creation loses to the `user_id` uniqueness constraint, in which case the
/// surviving row is fetched instead.
async fn fetch_or_create_cart(conn: &mut DbConn<'_>, user_id: i32) -> Result<CartEntity, AppError> {
    let existing: Option<CartEntity> = carts::table
        .filter(carts::user_id.eq(user_id))
        .first(conn)
        .await
        .optional()
        .context("Failed to look up cart")?;
    if let Some(cart) = existing {
        return Ok(cart);
    }

    let created: Option<CartEntity> = diesel::insert_into(carts::table)
        .values(CreateCartEntity { user_id })
        .on_conflict(carts::user_id)
        .do_nothing()
        .returning(CartEntity::as_returning())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to create cart")?;
    match created {
        Some(cart) => Ok(cart),
        None => Ok(carts::table
            .filter(carts::user_id.eq(user_id))
            .first(conn)
            .await
            .context("Failed to fetch cart after lost creation race")?),
    }
}

/// Insert-or-ignore on the `(cart_id, product_id)` uniqueness constraint.
/// Returns whether a new row was actually inserted; a duplicate is a no-op,
/// never an error.
async fn insert_item_or_ignore(
    conn: &mut DbConn<'_>,
    item: CreateCartItemEntity,
) -> Result<bool, AppError> {
    let inserted = diesel::insert_into(cart_items::table)
        .values(item)
        .on_conflict((cart_items::cart_id, cart_items::product_id))
        .do_nothing()
        .execute(conn)
        .await
        .context("Failed to insert cart item")?;
    Ok(inserted == 1)
}

/// Fetch the cart list for a user (cached).
#[utoipa::path(
    get,
    path = "/",
    tags = ["Carts"],
    params(
        ("user_id" = Option<i32>, Query, description = "User to fetch the cart for (unauthenticated variant)")
    ),
    responses(
        (status = 200, description = "Cart items ordered by insertion time", body = Vec<CartItemRes>)
    )
)]
async fn get_cart_list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(None)?;

    let key = cart_key(user_id);
    if let Some(items) = state.cache.get_json::<Vec<CartItemRes>>(&key).await {
        return Ok(Json(items));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let items = load_cart_items(conn, user_id).await?;
    state.cache.put_json(key, &items).await?;

    Ok(Json(items))
}

#[derive(Deserialize, ToSchema)]
struct AddCartItemReq {
    user_id: Option<i32>,
    #[serde(default)]
    cart_item: AddCartItemReqItem,
}

#[derive(Deserialize, Default, ToSchema)]
struct AddCartItemReqItem {
    product_id: Option<i32>,
    #[serde(default = "default_quantity")]
    quantity: i32,
    #[serde(default = "default_selected")]
    is_selected: bool,
}

fn default_quantity() -> i32 {
    1
}

fn default_selected() -> bool {
    true
}

/// Add a single item to the cart.
///
/// Never fails for the item itself: an unknown product, a non-positive
/// quantity, or a product already present in the cart all leave the cart
/// unchanged and still return the full list.
#[utoipa::path(
    post,
    path = "/add/",
    tags = ["Carts"],
    request_body = AddCartItemReq,
    responses(
        (status = 200, description = "Refreshed cart items", body = Vec<CartItemRes>)
    )
)]
async fn add_cart_item(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<AddCartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = fetch_or_create_cart(conn, user_id).await?;

    if let Some(product_id) = body.cart_item.product_id
        && body.cart_item.quantity > 0
    {
        let product_exists: i64 = products::table
            .filter(products::id.eq(product_id))
            .count()
            .get_result(conn)
            .await
            .context("Failed to check product existence")?;

        if product_exists > 0 {
            let inserted = insert_item_or_ignore(
                conn,
                CreateCartItemEntity {
                    cart_id: cart.id,
                    product_id,
                    quantity: body.cart_item.quantity,
                    is_selected: body.cart_item.is_selected,
                },
            )
            .await?;
            if !inserted {
                tracing::debug!(user_id, product_id, "Product already in cart, add skipped");
            }
        }
    }

    let items = load_cart_items(conn, user_id).await?;
    state.cache.put_json(cart_key(user_id), &items).await?;

    Ok(Json(items))
}

#[derive(Deserialize, ToSchema)]
struct MergeCartReq {
    user_id: Option<i32>,
    #[serde(default)]
    cart_items: Vec<MergeCartReqItem>,
}

#[derive(Deserialize, ToSchema)]
struct MergeCartReqItem {
    product: Option<MergeCartReqProduct>,
    #[serde(default = "default_quantity")]
    quantity: i32,
    #[serde(default = "default_selected")]
    is_selected: bool,
}

#[derive(Deserialize, ToSchema)]
struct MergeCartReqProduct {
    id: i32,
}

#[derive(Debug, PartialEq)]
struct MergeCandidate {
    product_id: i32,
    quantity: i32,
    is_selected: bool,
}

/// Keeps only entries that reference a product and carry a usable quantity.
fn merge_candidates(items: &[MergeCartReqItem]) -> Vec<MergeCandidate> {
    items
        .iter()
        .filter(|item| item.quantity > 0)
        .filter_map(|item| {
            item.product.as_ref().map(|product| MergeCandidate {
                product_id: product.id,
                quantity: item.quantity,
                is_selected: item.is_selected,
            })
        })
        .collect()
}

/// Splits candidates into (already in the cart, genuinely new).
fn partition_candidates(
    candidates: Vec<MergeCandidate>,
    existing: &HashSet<i32>,
) -> (Vec<MergeCandidate>, Vec<MergeCandidate>) {
    candidates
        .into_iter()
        .partition(|candidate| existing.contains(&candidate.product_id))
}

/// Merge a client-held guest cart into the persisted cart after login.
///
/// Items already in the cart are overwritten in place (last write wins);
/// new items are appended after a catalog existence check. Residual
/// uniqueness conflicts from racing merges are ignored.
#[utoipa::path(
    post,
    path = "/merge/",
    tags = ["Carts"],
    request_body = MergeCartReq,
    responses(
        (status = 200, description = "Refreshed cart items", body = Vec<CartItemRes>),
        (status = 400, description = "No processable items in the payload")
    )
)]
async fn merge_cart(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<MergeCartReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;

    let candidates = merge_candidates(&body.cart_items);
    if candidates.is_empty() {
        return Err(AppError::BadRequest(
            "Merge payload contains no processable cart items".into(),
        ));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let cart = fetch_or_create_cart(conn, user_id).await?;

            let existing: HashSet<i32> = cart_items::table
                .filter(cart_items::cart_id.eq(cart.id))
                .select(cart_items::product_id)
                .get_results::<i32>(conn)
                .await
                .context("Failed to get existing cart items")?
                .into_iter()
                .collect();

            let (duplicates, new_items) = partition_candidates(candidates, &existing);

            // Last write wins, scoped to this user's cart only.
            for duplicate in &duplicates {
                diesel::update(
                    cart_items::table
                        .filter(cart_items::cart_id.eq(cart.id))
                        .filter(cart_items::product_id.eq(duplicate.product_id)),
                )
                .set((
                    cart_items::quantity.eq(duplicate.quantity),
                    cart_items::is_selected.eq(duplicate.is_selected),
                ))
                .execute(conn)
                .await
                .context("Failed to overwrite merged cart item")?;
            }

            // A guest cart may reference products that have since left the
            // catalog; those entries are dropped silently.
            let new_ids: Vec<i32> = new_items.iter().map(|item| item.product_id).collect();
            let valid_ids: HashSet<i32> = products::table
                .filter(products::id.eq_any(&new_ids))
                .select(products::id)
                .get_results::<i32>(conn)
                .await
                .context("Failed to validate merged products")?
                .into_iter()
                .collect();

            let rows: Vec<CreateCartItemEntity> = new_items
                .into_iter()
                .filter(|item| valid_ids.contains(&item.product_id))
                .map(|item| CreateCartItemEntity {
                    cart_id: cart.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    is_selected: item.is_selected,
                })
                .collect();

            if !rows.is_empty() {
                diesel::insert_into(cart_items::table)
                    .values(rows)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await
                    .context("Failed to bulk insert merged cart items")?;
            }

            Ok::<(), AppError>(())
        })
    })
    .await?;

    let items = load_cart_items(conn, user_id).await?;
    state.cache.put_json(cart_key(user_id), &items).await?;

    Ok(Json(items))
}

#[derive(Deserialize, ToSchema)]
struct UpdateCartReq {
    user_id: Option<i32>,
    #[serde(default)]
    cart_item: UpdateCartReqItem,
}

#[derive(Deserialize, Default, ToSchema)]
struct UpdateCartReqItem {
    product_id: Option<i32>,
    quantity: Option<i32>,
    is_selected: Option<bool>,
}

/// The two recognized update shapes, resolved at the request boundary.
/// Anything else is rejected instead of falling through to a default.
#[derive(Debug, PartialEq)]
enum UpdateCartAction {
    /// Patch the given fields on one cart row.
    SingleItem {
        product_id: i32,
        changes: UpdateCartItemChangeset,
    },
    /// Select or deselect every item in the cart.
    AllItems { is_selected: bool },
}

impl TryFrom<UpdateCartReqItem> for UpdateCartAction {
    type Error = AppError;

    fn try_from(item: UpdateCartReqItem) -> Result<Self, Self::Error> {
        match item {
            UpdateCartReqItem {
                product_id: Some(product_id),
                quantity,
                is_selected,
            } if quantity.is_some() || is_selected.is_some() => Ok(Self::SingleItem {
                product_id,
                changes: UpdateCartItemChangeset {
                    quantity,
                    is_selected,
                },
            }),
            UpdateCartReqItem {
                product_id: None,
                is_selected: Some(is_selected),
                ..
            } => Ok(Self::AllItems { is_selected }),
            _ => Err(AppError::BadRequest(
                "Unrecognized cart update shape".into(),
            )),
        }
    }
}

/// Update one cart item's fields, or bulk-toggle selection for the whole
/// cart when no product id is given.
#[utoipa::path(
    patch,
    path = "/update/",
    tags = ["Carts"],
    request_body = UpdateCartReq,
    responses(
        (status = 200, description = "Refreshed cart items", body = Vec<CartItemRes>),
        (status = 400, description = "Payload matches neither update shape")
    )
)]
async fn update_cart_item(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<UpdateCartReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;
    let action = UpdateCartAction::try_from(body.cart_item)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart_scope = carts::table
        .filter(carts::user_id.eq(user_id))
        .select(carts::id);

    match action {
        UpdateCartAction::SingleItem {
            product_id,
            changes,
        } => {
            // A product id not present in the cart matches zero rows; the
            // refreshed list is returned either way.
            diesel::update(
                cart_items::table
                    .filter(cart_items::cart_id.eq_any(cart_scope))
                    .filter(cart_items::product_id.eq(product_id)),
            )
            .set(&changes)
            .execute(conn)
            .await
            .context("Failed to update cart item")?;
        }
        UpdateCartAction::AllItems { is_selected } => {
            diesel::update(cart_items::table.filter(cart_items::cart_id.eq_any(cart_scope)))
                .set(cart_items::is_selected.eq(is_selected))
                .execute(conn)
                .await
                .context("Failed to update cart selection")?;
        }
    }

    let items = load_cart_items(conn, user_id).await?;
    state.cache.put_json(cart_key(user_id), &items).await?;

    Ok(Json(items))
}

#[derive(Deserialize)]
struct DeleteCartQuery {
    product_ids: Option<String>,
}

/// Parses the comma-separated `product_ids` query value. Missing, empty,
/// or unparsable input is a client error.
fn parse_product_ids(raw: Option<&str>) -> Result<Vec<i32>, AppError> {
    let raw = raw.ok_or_else(|| AppError::BadRequest("Missing product_ids".into()))?;
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i32>()
                .map_err(|_| AppError::BadRequest(format!("Invalid product id {part:?}")))
        })
        .collect::<Result<Vec<i32>, AppError>>()?;
    if ids.is_empty() {
        return Err(AppError::BadRequest("Empty product_ids".into()));
    }
    Ok(ids)
}

/// Delete the given products from the cart.
#[utoipa::path(
    delete,
    path = "/delete/",
    tags = ["Carts"],
    params(
        ("user_id" = Option<i32>, Query, description = "User whose cart to delete from (unauthenticated variant)"),
        ("product_ids" = String, Query, description = "Comma-separated product ids to remove")
    ),
    responses(
        (status = 200, description = "Refreshed cart items", body = Vec<CartItemRes>),
        (status = 400, description = "Missing or malformed product_ids")
    )
)]
async fn delete_cart_items(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<DeleteCartQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(None)?;
    let product_ids = parse_product_ids(query.product_ids.as_deref())?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart_scope = carts::table
        .filter(carts::user_id.eq(user_id))
        .select(carts::id);

    diesel::delete(
        cart_items::table
            .filter(cart_items::cart_id.eq_any(cart_scope))
            .filter(cart_items::product_id.eq_any(&product_ids)),
    )
    .execute(conn)
    .await
    .context("Failed to delete cart items")?;

    let items = load_cart_items(conn, user_id).await?;
    state.cache.put_json(cart_key(user_id), &items).await?;

    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_item(product_id: Option<i32>, quantity: i32, is_selected: bool) -> MergeCartReqItem {
        MergeCartReqItem {
            product: product_id.map(|id| MergeCartReqProduct { id }),
            quantity,
            is_selected,
        }
    }

    #[test]
    fn merge_candidates_drop_productless_and_zero_quantity_entries() {
        let items = vec![
            req_item(Some(1), 2, true),
            req_item(None, 3, true),
            req_item(Some(2), 0, false),
            req_item(Some(3), 1, false),
        ];

        let candidates = merge_candidates(&items);
        assert_eq!(
            candidates,
            vec![
                MergeCandidate {
                    product_id: 1,
                    quantity: 2,
                    is_selected: true
                },
                MergeCandidate {
                    product_id: 3,
                    quantity: 1,
                    is_selected: false
                },
            ]
        );
    }

    #[test]
    fn merge_candidates_of_empty_payload_is_empty() {
        assert!(merge_candidates(&[]).is_empty());
        assert!(merge_candidates(&[req_item(None, 1, true)]).is_empty());
    }

    #[test]
    fn partition_splits_duplicates_from_new_items() {
        let existing: HashSet<i32> = [1, 2].into_iter().collect();
        let candidates = vec![
            MergeCandidate {
                product_id: 1,
                quantity: 5,
                is_selected: false,
            },
            MergeCandidate {
                product_id: 9,
                quantity: 1,
                is_selected: true,
            },
        ];

        let (duplicates, new_items) = partition_candidates(candidates, &existing);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].product_id, 1);
        assert_eq!(new_items.len(), 1);
        assert_eq!(new_items[0].product_id, 9);
    }

    #[test]
    fn update_shape_with_product_id_and_fields_is_single_item() {
        let action = UpdateCartAction::try_from(UpdateCartReqItem {
            product_id: Some(4),
            quantity: Some(2),
            is_selected: None,
        })
        .unwrap();

        assert_eq!(
            action,
            UpdateCartAction::SingleItem {
                product_id: 4,
                changes: UpdateCartItemChangeset {
                    quantity: Some(2),
                    is_selected: None,
                },
            }
        );
    }

    #[test]
    fn update_shape_without_product_id_is_bulk_selection() {
        let action = UpdateCartAction::try_from(UpdateCartReqItem {
            product_id: None,
            quantity: None,
            is_selected: Some(false),
        })
        .unwrap();

        assert_eq!(action, UpdateCartAction::AllItems { is_selected: false });
    }

    #[test]
    fn update_shape_with_bare_product_id_is_rejected() {
        let result = UpdateCartAction::try_from(UpdateCartReqItem {
            product_id: Some(4),
            quantity: None,
            is_selected: None,
        });
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn empty_update_shape_is_rejected() {
        let result = UpdateCartAction::try_from(UpdateCartReqItem::default());
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn product_ids_parse_with_whitespace_and_stray_commas() {
        assert_eq!(parse_product_ids(Some("1,2,3")).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_product_ids(Some(" 4 , 5 ,")).unwrap(), vec![4, 5]);
    }

    #[test]
    fn missing_or_empty_product_ids_are_rejected() {
        assert!(matches!(
            parse_product_ids(None),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_product_ids(Some("")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_product_ids(Some("1,x")),
            Err(AppError::BadRequest(_))
        ));
    }
}
