use axum::extract::Path;
use axum::{Extension, Json};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Principal;
use crate::err::Error;
use crate::models::{AddressData, AddressForm, Role};
use crate::view::{Payload, View};

pub const ADDRESSES_VIEW: &str = "addresses";

const ADDRESS_SELECT: &str =
    "SELECT id, country, city, street, street_number, user_id FROM addresses";

pub async fn owned_by(pg: &PgPool, user_id: Uuid) -> Result<Vec<AddressData>, Error> {
    Ok(sqlx::query_as::<_, AddressData>(&format!(
        "{} WHERE user_id = $1 ORDER BY country, city, street, street_number",
        ADDRESS_SELECT
    ))
    .bind(user_id)
    .fetch_all(pg)
    .await?)
}

pub async fn find_by_id(pg: &PgPool, id: Uuid) -> Result<Option<AddressData>, Error> {
    Ok(sqlx::query_as::<_, AddressData>(&format!("{} WHERE id = $1", ADDRESS_SELECT))
        .bind(id)
        .fetch_optional(pg)
        .await?)
}

pub async fn insert(pg: &PgPool, user_id: Uuid, form: &AddressForm) -> Result<AddressData, Error> {
    Ok(sqlx::query_as::<_, AddressData>(
        "INSERT INTO addresses (id, country, city, street, street_number, user_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, country, city, street, street_number, user_id",
    )
    .bind(Uuid::new_v4())
    .bind(&form.country)
    .bind(&form.city)
    .bind(&form.street)
    .bind(&form.street_number)
    .bind(user_id)
    .fetch_one(pg)
    .await?)
}

pub async fn update(pg: &PgPool, id: Uuid, form: &AddressForm) -> Result<(), Error> {
    sqlx::query(
        "UPDATE addresses SET country = $2, city = $3, street = $4, street_number = $5 WHERE id = $1",
    )
    .bind(id)
    .bind(&form.country)
    .bind(&form.city)
    .bind(&form.street)
    .bind(&form.street_number)
    .execute(pg)
    .await?;
    Ok(())
}

/// Consultations held at the address are removed with it.
pub async fn delete(pg: &PgPool, id: Uuid) -> Result<(), Error> {
    sqlx::query("DELETE FROM addresses WHERE id = $1")
        .bind(id)
        .execute(pg)
        .await?;
    Ok(())
}

/// Fetches an address the principal owns, or explains why it cannot.
async fn own_address(pg: &PgPool, principal: &Principal, id: Uuid) -> Result<AddressData, Error> {
    let address = find_by_id(pg, id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Address with ID {} does not exist", id)))?;
    if address.user_id != principal.id() {
        return Err(Error::forbidden(format!("Address with ID {} does not belong to you", id)));
    }
    Ok(address)
}

#[derive(Debug, Serialize)]
pub struct AddressesModel {
    addresses: Vec<AddressData>,
}

async fn listing(pg: &PgPool, principal: &Principal) -> Result<View<AddressesModel>, Error> {
    Ok(View::new(
        ADDRESSES_VIEW,
        AddressesModel {
            addresses: owned_by(pg, principal.id()).await?,
        },
    ))
}

pub async fn list_addresses(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<AddressesModel>> {
    principal.require(Role::Tutor)?;
    listing(&pg, &principal).await?.render()
}

#[derive(Debug, Serialize)]
pub struct AddressModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<AddressData>,
}

pub async fn add_address_page(principal: Principal) -> Payload<View<AddressModel>> {
    principal.require(Role::Tutor)?;
    View::new("add-address", AddressModel { address: None }).render()
}

pub async fn add_address(
    principal: Principal,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<AddressForm>,
) -> Payload<View<AddressesModel>> {
    principal.require(Role::Tutor)?;
    if let Err(errors) = form.validate() {
        log::error!("Cannot save address, wrong input");
        return Err(Error::invalid("add-address", &errors));
    }
    let address = insert(&pg, principal.id(), &form).await?;
    log::info!("Address with ID {} successfully saved", address.id);
    listing(&pg, &principal)
        .await?
        .success("Successfully added new address")
        .render()
}

pub async fn update_address_page(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<AddressModel>> {
    principal.require(Role::Tutor)?;
    let address = own_address(&pg, &principal, id).await?;
    View::new("update-address", AddressModel { address: Some(address) }).render()
}

pub async fn update_address(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
    Json(form): Json<AddressForm>,
) -> Payload<View<AddressesModel>> {
    principal.require(Role::Tutor)?;
    own_address(&pg, &principal, id).await?;
    if let Err(errors) = form.validate() {
        log::error!("Cannot update address, wrong input");
        return Err(Error::invalid("update-address", &errors));
    }
    update(&pg, id, &form).await?;
    log::info!("Address with ID {} successfully updated", id);
    listing(&pg, &principal)
        .await?
        .success("Address was successfully updated")
        .render()
}

pub async fn delete_address(
    principal: Principal,
    Path(id): Path<Uuid>,
    Extension(pg): Extension<PgPool>,
) -> Payload<View<AddressesModel>> {
    principal.require(Role::Tutor)?;
    own_address(&pg, &principal, id).await?;
    delete(&pg, id).await?;
    log::info!("Successfully deleted address with ID: {}", id);
    listing(&pg, &principal)
        .await?
        .success(format!("Address with ID {} was successfully deleted", id))
        .render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_address_field_is_required() {
        let form = AddressForm {
            country: "Poland".into(),
            city: String::new(),
            street: "Narutowicza".into(),
            street_number: String::new(),
        };
        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("city"));
        assert!(fields.contains_key("street_number"));
        assert!(!fields.contains_key("country"));
        assert_eq!(
            fields["city"][0].message.as_deref(),
            Some("Please provide a city")
        );
    }
}
