use bytes::BufMut;
use futures_util::TryStreamExt;
use serde_json::json;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::{reply, Reply};

use crate::accounts::{LoginInput, RegisterInput, RegisterOutcome};
use crate::classifier::Prediction;
use crate::errors::ServerError;
use crate::loaded_model::assert_model_loaded;
use crate::utils::{field_errors_reply, server_err_proc, single_field_error, EndpointResult};
use crate::{file_manager, image_input};
use crate::{AccountsDep, FileManagerDep, LoadedModelDep, ModelSourceDep};

const INVALID_IMAGE_MESSAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

struct Upload {
    bytes: Vec<u8>,
    extension: String,
}

async fn read_image_field(mut form: FormData) -> Option<Upload> {
    while let Ok(Some(part)) = form.try_next().await {
        if part.name() != "image" {
            continue;
        }
        let extension = file_manager::extension_of(part.filename());
        let bytes = part
            .stream()
            .try_fold(Vec::new(), |mut acc, data| {
                acc.put(data);
                async move { Ok(acc) }
            })
            .await
            .ok()?;
        return Some(Upload { bytes, extension });
    }
    None
}

/// Upload -> persist pending -> preprocess -> classify -> persist final -> 201.
pub async fn predict(
    form: FormData,
    source: ModelSourceDep,
    loaded: LoadedModelDep,
    file_manager: FileManagerDep,
) -> EndpointResult<impl Reply> {
    let upload = match read_image_field(form).await {
        Some(upload) if !upload.bytes.is_empty() => upload,
        _ => return Ok(single_field_error("image", "No file was submitted.")),
    };
    if image::guess_format(&upload.bytes).is_err() {
        return Ok(single_field_error("image", INVALID_IMAGE_MESSAGE));
    }

    let record = {
        let mut file_manager = file_manager.write().await;
        match file_manager.create_pending(&upload.bytes, &upload.extension) {
            Ok(record) => record,
            Err(e) => return server_err_proc(&e.into()),
        }
    };
    info!(%record, "stored upload");

    let stored_path = file_manager.read().await.image_path(&record);
    let raw = match std::fs::read(&stored_path) {
        Ok(bytes) => bytes,
        Err(e) => return server_err_proc(&e.into()),
    };
    let batch = match image_input::preprocess(&raw) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(id = record.id, error = %e, "upload did not decode");
            return Ok(single_field_error("image", INVALID_IMAGE_MESSAGE));
        }
    };

    if let Err(e) = assert_model_loaded(&loaded, &source).await {
        return server_err_proc(&e);
    }
    let scores = {
        let loaded = loaded.read().await;
        let classifier = match loaded.get() {
            Some(classifier) => classifier,
            None => {
                return server_err_proc(&ServerError::ModelLoad(
                    "classifier missing after load".to_owned(),
                ))
            }
        };
        match classifier.scores(batch) {
            Ok(scores) => scores,
            Err(e) => return server_err_proc(&e),
        }
    };
    let prediction = match Prediction::from_scores(&scores) {
        Ok(prediction) => prediction,
        Err(e) => return server_err_proc(&e),
    };

    let record = {
        let mut file_manager = file_manager.write().await;
        match file_manager.set_prediction(record.id, prediction.display()) {
            Ok(record) => record,
            Err(e) => return server_err_proc(&e.into()),
        }
    };
    info!(%record, "classified upload");
    Ok(reply::with_status(
        reply::json(&record),
        StatusCode::CREATED,
    ))
}

pub async fn register(input: RegisterInput, accounts: AccountsDep) -> EndpointResult<impl Reply> {
    let mut accounts = accounts.write().await;
    match accounts.register(&input) {
        Ok(RegisterOutcome::Created(user, token)) => {
            info!(id = user.id, username = %user.username, "registered user");
            Ok(reply::with_status(
                reply::json(&json!({
                    "token": token,
                    "user": {
                        "id": user.id,
                        "email": user.email,
                        "full_name": user.full_name,
                        "phone_number": user.phone_number,
                    }
                })),
                StatusCode::CREATED,
            ))
        }
        Ok(RegisterOutcome::Invalid(errors)) => Ok(field_errors_reply(&errors)),
        Err(e) => server_err_proc(&e.into()),
    }
}

pub async fn login(input: LoginInput, accounts: AccountsDep) -> EndpointResult<impl Reply> {
    let email = input.email.unwrap_or_default();
    let password = input.password.unwrap_or_default();

    let mut accounts = accounts.write().await;
    match accounts.login(&email, &password) {
        Ok(Some((user, token))) => Ok(reply::with_status(
            reply::json(&json!({
                "token": token,
                "user": {
                    "id": user.id,
                    "email": user.email,
                    "username": user.username,
                    "full_name": user.full_name,
                    "phone_number": user.phone_number,
                }
            })),
            StatusCode::OK,
        )),
        Ok(None) => Ok(reply::with_status(
            reply::json(&json!({ "error": "Invalid credentials" })),
            StatusCode::BAD_REQUEST,
        )),
        Err(e) => server_err_proc(&e.into()),
    }
}
