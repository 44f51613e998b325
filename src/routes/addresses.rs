use anyhow::Context;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    cache::address_key,
    core::{aliases::DbConn, app_error::AppError, app_state::AppState},
    identity::{self, Identity},
    models::{
        CreateShippingAddressEntity, ShippingAddressEntity, UpdateShippingAddressChangeset,
    },
    schema::shipping_addresses,
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/address",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_address_list))
            .routes(utoipa_axum::routes!(add_address))
            .routes(utoipa_axum::routes!(edit_address))
            .route_layer(axum::middleware::from_fn_with_state(
                state,
                identity::authorization,
            )),
    )
}

/// A shipping address as returned to clients. `is_selected` is transient:
/// it marks the row the request just acted upon, falling back to the
/// default address on plain reads.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct AddressRes {
    pub id: i32,
    pub full_name: String,
    pub mobile_number: String,
    pub pin_code: String,
    pub address1: String,
    pub address2: String,
    pub city: String,
    pub state: String,
    pub is_default: bool,
    pub is_selected: bool,
}

/// Which row carries the transient `is_selected` flag in a response.
#[derive(Debug, Clone, Copy)]
enum Selection {
    /// Selection mirrors `is_default`.
    Default,
    /// The row a mutation just touched is selected, default or not.
    JustActedOn(i32),
}

fn annotate(addresses: Vec<ShippingAddressEntity>, selection: Selection) -> Vec<AddressRes> {
    addresses
        .into_iter()
        .map(|address| {
            let is_selected = match selection {
                Selection::Default => address.is_default,
                Selection::JustActedOn(id) => address.id == id,
            };
            AddressRes {
                id: address.id,
                full_name: address.full_name,
                mobile_number: address.mobile_number,
                pin_code: address.pin_code,
                address1: address.address1,
                address2: address.address2,
                city: address.city,
                state: address.state,
                is_default: address.is_default,
                is_selected,
            }
        })
        .collect()
}

async fn load_addresses(
    conn: &mut DbConn<'_>,
    user_id: i32,
) -> Result<Vec<ShippingAddressEntity>, AppError> {
    Ok(shipping_addresses::table
        .filter(shipping_addresses::user_id.eq(user_id))
        .order_by(shipping_addresses::created_at.asc())
        .select(ShippingAddressEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get shipping addresses")?)
}

/// Fetch the user's address book (cached).
#[utoipa::path(
    get,
    path = "/",
    tags = ["Addresses"],
    params(
        ("user_id" = Option<i32>, Query, description = "User to list addresses for (unauthenticated variant)")
    ),
    responses(
        (status = 200, description = "Addresses ordered by creation time", body = Vec<AddressRes>)
    )
)]
async fn get_address_list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(None)?;

    let key = address_key(user_id);
    if let Some(addresses) = state.cache.get_json::<Vec<AddressRes>>(&key).await {
        return Ok(Json(addresses));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let addresses = annotate(load_addresses(conn, user_id).await?, Selection::Default);
    state.cache.put_json(key, &addresses).await?;

    Ok(Json(addresses))
}

#[derive(Deserialize, ToSchema)]
struct AddAddressReq {
    user_id: Option<i32>,
    new_address: Option<NewAddressPayload>,
}

#[derive(Deserialize, Default, ToSchema)]
struct NewAddressPayload {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    mobile_number: String,
    #[serde(default)]
    pin_code: String,
    #[serde(default)]
    address1: String,
    #[serde(default)]
    address2: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    is_default: bool,
}

/// Add a shipping address.
///
/// The first address a user ever creates is stored as the default no matter
/// what the payload says; every later one is stored non-default, so a
/// client payload can never produce two defaults.
#[utoipa::path(
    post,
    path = "/add/",
    tags = ["Addresses"],
    request_body = AddAddressReq,
    responses(
        (status = 200, description = "Refreshed address list, new row selected", body = Vec<AddressRes>),
        (status = 400, description = "Missing new_address payload")
    )
)]
async fn add_address(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<AddAddressReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;
    let payload = body
        .new_address
        .ok_or_else(|| AppError::BadRequest("Missing new_address".into()))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let existing: i64 = shipping_addresses::table
        .filter(shipping_addresses::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .await
        .context("Failed to count existing addresses")?;

    if payload.is_default && existing > 0 {
        tracing::debug!(user_id, "Ignoring is_default on a non-first address");
    }

    let created: ShippingAddressEntity = diesel::insert_into(shipping_addresses::table)
        .values(CreateShippingAddressEntity {
            user_id,
            full_name: payload.full_name,
            mobile_number: payload.mobile_number,
            pin_code: payload.pin_code,
            address1: payload.address1,
            address2: payload.address2,
            city: payload.city,
            state: payload.state,
            is_default: existing == 0,
        })
        .returning(ShippingAddressEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create shipping address")?;

    let addresses = annotate(
        load_addresses(conn, user_id).await?,
        Selection::JustActedOn(created.id),
    );
    state
        .cache
        .put_json(address_key(user_id), &addresses)
        .await?;

    Ok(Json(addresses))
}

#[derive(Deserialize, ToSchema)]
struct EditAddressReq {
    user_id: Option<i32>,
    updated_address: Option<EditAddressPayload>,
}

#[derive(Deserialize, Default, ToSchema)]
struct EditAddressPayload {
    id: Option<i32>,
    full_name: Option<String>,
    mobile_number: Option<String>,
    pin_code: Option<String>,
    address1: Option<String>,
    address2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    is_default: Option<bool>,
    /// Transient display flag; accepted from clients but never persisted.
    is_selected: Option<bool>,
}

impl EditAddressPayload {
    /// Splits the payload into the target id and the persistable changes,
    /// dropping the transient `is_selected` flag.
    fn into_changes(self) -> Result<(i32, UpdateShippingAddressChangeset), AppError> {
        let id = self
            .id
            .ok_or_else(|| AppError::BadRequest("Missing address id".into()))?;
        Ok((
            id,
            UpdateShippingAddressChangeset {
                full_name: self.full_name,
                mobile_number: self.mobile_number,
                pin_code: self.pin_code,
                address1: self.address1,
                address2: self.address2,
                city: self.city,
                state: self.state,
                is_default: self.is_default,
            },
        ))
    }
}

/// Edit a shipping address.
///
/// Patches only the supplied fields; default status changes only when
/// `is_default` is explicitly included. An unknown id mutates nothing and
/// the returned list falls selection back to the default address.
#[utoipa::path(
    patch,
    path = "/edit/",
    tags = ["Addresses"],
    request_body = EditAddressReq,
    responses(
        (status = 200, description = "Refreshed address list", body = Vec<AddressRes>),
        (status = 400, description = "Missing address id")
    )
)]
async fn edit_address(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<EditAddressReq>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = identity.resolve(body.user_id)?;
    let payload = body
        .updated_address
        .ok_or_else(|| AppError::BadRequest("Missing updated_address".into()))?;
    let (address_id, changes) = payload.into_changes()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let exists: i64 = shipping_addresses::table
        .filter(shipping_addresses::id.eq(address_id))
        .count()
        .get_result(conn)
        .await
        .context("Failed to look up address")?;

    let selection = if exists > 0 {
        if changes.has_changes() {
            diesel::update(shipping_addresses::table.filter(shipping_addresses::id.eq(address_id)))
                .set(&changes)
                .execute(conn)
                .await
                .context("Failed to update shipping address")?;
        }
        Selection::JustActedOn(address_id)
    } else {
        Selection::Default
    };

    let addresses = annotate(load_addresses(conn, user_id).await?, selection);
    state
        .cache
        .put_json(address_key(user_id), &addresses)
        .await?;

    Ok(Json(addresses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn address(id: i32, is_default: bool) -> ShippingAddressEntity {
        ShippingAddressEntity {
            id,
            user_id: 1,
            full_name: format!("User {id}"),
            mobile_number: "9999999999".into(),
            pin_code: "560001".into(),
            address1: "12 Main St".into(),
            address2: String::new(),
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            is_default,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_selection_mirrors_is_default() {
        let annotated = annotate(
            vec![address(1, true), address(2, false)],
            Selection::Default,
        );
        assert!(annotated[0].is_selected);
        assert!(!annotated[1].is_selected);
    }

    #[test]
    fn acted_on_selection_marks_that_row_even_if_not_default() {
        let annotated = annotate(
            vec![address(1, true), address(2, false)],
            Selection::JustActedOn(2),
        );
        assert!(!annotated[0].is_selected);
        assert!(annotated[1].is_selected);
        // Default status itself is untouched by selection.
        assert!(annotated[0].is_default);
    }

    #[test]
    fn edit_payload_requires_an_id() {
        let result = EditAddressPayload::default().into_changes();
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn edit_payload_strips_the_transient_selection_flag() {
        let payload = EditAddressPayload {
            id: Some(3),
            city: Some("Mysuru".into()),
            is_selected: Some(true),
            ..Default::default()
        };

        let (id, changes) = payload.into_changes().unwrap();
        assert_eq!(id, 3);
        assert_eq!(changes.city.as_deref(), Some("Mysuru"));
        // Only the supplied field is part of the changeset.
        assert_eq!(
            changes,
            UpdateShippingAddressChangeset {
                city: Some("Mysuru".into()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn id_only_payload_has_no_changes() {
        let payload = EditAddressPayload {
            id: Some(3),
            is_selected: Some(false),
            ..Default::default()
        };
        let (_, changes) = payload.into_changes().unwrap();
        assert!(!changes.has_changes());
    }

    #[test]
    fn explicit_is_default_is_a_persistable_change() {
        let payload = EditAddressPayload {
            id: Some(3),
            is_default: Some(true),
            ..Default::default()
        };
        let (_, changes) = payload.into_changes().unwrap();
        assert!(changes.has_changes());
        assert_eq!(changes.is_default, Some(true));
    }
}
