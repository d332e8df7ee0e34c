use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::middleware::require_delivery_personnel;
use crate::auth::Identity;
use crate::error::AppError;
use crate::models::courier::{Courier, CourierPatch, LocationList, NewCourier};
use crate::observability::sanitize::sanitize_for_log;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/me", get(profile).patch(update_profile))
        .route_layer(axum::middleware::from_fn(require_delivery_personnel))
}

#[derive(Serialize)]
pub struct CourierEnvelope {
    pub message: &'static str,
    pub courier: Courier,
}

/// Courier profile owned by the calling account.
pub(crate) fn current_courier(state: &AppState, identity: &Identity) -> Result<Courier, AppError> {
    state
        .couriers
        .find_by_account(&identity.id)
        .ok_or_else(|| AppError::NotFound("Driver not found".to_string()))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<CourierEnvelope>), AppError> {
    if state.couriers.find_by_account(&identity.id).is_some() {
        return Err(AppError::Conflict("Driver already registered".to_string()));
    }

    let form = RegistrationForm::read(multipart?).await?;
    let (mut new_courier, image) = form.validate(&identity.id)?;

    if let Some(upload) = image {
        let stored = store_profile_image(&state.options.upload_dir, upload).await?;
        new_courier.profile_image = Some(stored);
    }

    let courier = match state.couriers.register(new_courier.clone()) {
        Ok(courier) => courier,
        Err(err) => {
            if let Some(file_name) = &new_courier.profile_image {
                discard_profile_image(&state.options.upload_dir, file_name).await;
            }
            return Err(err);
        }
    };

    info!(
        courier_id = %courier.id,
        pickup = %sanitize_for_log(&courier.pickup_location),
        destinations = courier.delivery_locations.len(),
        "courier registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(CourierEnvelope {
            message: "Driver registered successfully",
            courier,
        }),
    ))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Courier>, AppError> {
    current_courier(&state, &identity).map(Json)
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<CourierPatch>, JsonRejection>,
) -> Result<Json<CourierEnvelope>, AppError> {
    let Json(patch) = payload?;
    patch.validate()?;

    let courier = state
        .couriers
        .update_profile(&identity.id, patch)
        .ok_or_else(|| AppError::NotFound("Driver not found".to_string()))?;
    info!(courier_id = %courier.id, "courier profile updated");

    Ok(Json(CourierEnvelope {
        message: "Driver updated successfully",
        courier,
    }))
}

struct ImageUpload {
    file_name: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct RegistrationForm {
    pickup_location: Option<String>,
    delivery_locations: Vec<String>,
    vehicle_reg_number: Option<String>,
    mobile_number: Option<String>,
    image: Option<ImageUpload>,
}

impl RegistrationForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "profileImage" => {
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await?;
                    if !bytes.is_empty() {
                        form.image = Some(ImageUpload { file_name, bytes });
                    }
                }
                "pickupLocation" => form.pickup_location = Some(field.text().await?),
                "deliveryLocations" | "deliveryLocations[]" => {
                    form.delivery_locations.push(field.text().await?)
                }
                "vehicleRegNumber" => form.vehicle_reg_number = Some(field.text().await?),
                "mobileNumber" => form.mobile_number = Some(field.text().await?),
                other => debug!(field = %sanitize_for_log(other), "ignoring registration field"),
            }
        }

        Ok(form)
    }

    fn validate(self, account_id: &str) -> Result<(NewCourier, Option<ImageUpload>), AppError> {
        let new_courier = NewCourier {
            account_id: account_id.to_string(),
            pickup_location: required("pickupLocation", self.pickup_location)?,
            delivery_locations: LocationList::Csv(self.delivery_locations.join(",")).into_vec(),
            vehicle_reg_number: required("vehicleRegNumber", self.vehicle_reg_number)?,
            mobile_number: required("mobileNumber", self.mobile_number)?,
            profile_image: None,
        };

        Ok((new_courier, self.image))
    }
}

fn required(name: &str, value: Option<String>) -> Result<String, AppError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{name} is required")))
}

/// Writes the upload as `<millis>-<uuid>.<ext>` and returns the stored file name.
async fn store_profile_image(dir: &Path, upload: ImageUpload) -> Result<String, AppError> {
    let stem = format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4());
    let file_name = match image_extension(upload.file_name.as_deref()) {
        Some(extension) => format!("{stem}.{extension}"),
        None => stem,
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| AppError::Internal(format!("failed to create upload dir: {err}")))?;
    tokio::fs::write(dir.join(&file_name), &upload.bytes)
        .await
        .map_err(|err| {
            warn!(error = %err, "failed writing profile image");
            AppError::Internal(format!("failed to store profile image: {err}"))
        })?;

    Ok(file_name)
}

/// Best-effort removal of an image whose registration did not go through.
async fn discard_profile_image(dir: &Path, file_name: &str) -> bool {
    let path = dir.join(file_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => true,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "failed removing orphaned profile image"
            );
            false
        }
    }
}

fn image_extension(file_name: Option<&str>) -> Option<String> {
    Path::new(file_name?)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}
