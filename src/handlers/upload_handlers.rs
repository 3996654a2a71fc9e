//! HTTP handlers for the multipart upload protocol.
//! Each handler unpacks the JSON body and delegates to `UploadService`;
//! error mapping lives in `AppError`.

use crate::{
    errors::AppError,
    models::upload::{
        AbortUploadRequest, AbortUploadResponse, CompleteUploadRequest, CompleteUploadResponse,
        PartUrlRequest, PartUrlResponse, StartUploadRequest, StartUploadResponse,
    },
    services::{
        gateway::CompletedPart,
        upload_service::{ABORTED_MESSAGE, COMPLETED_MESSAGE, UploadService},
    },
};
use axum::{Json, extract::State, extract::rejection::JsonRejection};
use chrono::Utc;
use serde_json::{Value, json};

/// `GET /` — self-documentation of the API.
pub async fn index() -> Json<Value> {
    Json(endpoint_catalog())
}

/// `POST /start-multipart-upload`
pub async fn start_multipart_upload(
    State(service): State<UploadService>,
    payload: Result<Json<StartUploadRequest>, JsonRejection>,
) -> Result<Json<StartUploadResponse>, AppError> {
    let Json(req) = payload?;
    let session = service
        .start_upload(
            req.file_name.as_deref().unwrap_or_default(),
            req.file_type.as_deref().unwrap_or_default(),
        )
        .await?;

    Ok(Json(StartUploadResponse {
        upload_id: session.upload_id,
        start_date_time: session.created_at,
    }))
}

/// `POST /get-upload-url`
pub async fn get_upload_url(
    State(service): State<UploadService>,
    payload: Result<Json<PartUrlRequest>, JsonRejection>,
) -> Result<Json<PartUrlResponse>, AppError> {
    let Json(req) = payload?;
    let presigned = service
        .part_url(req.upload_id.as_deref().unwrap_or_default(), req.part_number)
        .await?;

    Ok(Json(PartUrlResponse {
        url: presigned.url,
        expires_at: presigned.expires_at,
    }))
}

/// `POST /complete-multipart-upload`
pub async fn complete_multipart_upload(
    State(service): State<UploadService>,
    payload: Result<Json<CompleteUploadRequest>, JsonRejection>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    let Json(req) = payload?;
    let parts = req.parts.into_iter().map(CompletedPart::from).collect();
    let session = service
        .complete_upload(req.upload_id.as_deref().unwrap_or_default(), parts)
        .await?;

    Ok(Json(CompleteUploadResponse {
        message: COMPLETED_MESSAGE,
        end_date_time: Utc::now(),
        key: session.object_key,
    }))
}

/// `POST /abort-multipart-upload`
pub async fn abort_multipart_upload(
    State(service): State<UploadService>,
    payload: Result<Json<AbortUploadRequest>, JsonRejection>,
) -> Result<Json<AbortUploadResponse>, AppError> {
    let Json(req) = payload?;
    let session = service
        .abort_upload(req.upload_id.as_deref().unwrap_or_default())
        .await?;

    Ok(Json(AbortUploadResponse {
        message: ABORTED_MESSAGE,
        key: session.object_key,
    }))
}

fn endpoint_catalog() -> Value {
    json!([
        {
            "endPoint": "/start-multipart-upload",
            "method": "POST",
            "description": "Start multipart upload",
            "body": [
                { "fileName": "file name.png", "description": "file name with extension" },
                { "fileType": "image/png", "description": "file type" }
            ],
            "response": [
                { "uploadId": "upload id", "description": "upload id" },
                { "startDateTime": "start date time", "description": "start date time" }
            ]
        },
        {
            "endPoint": "/get-upload-url",
            "method": "POST",
            "description": "Get signed url for uploading part",
            "body": [
                { "fileName": "file name.png", "description": "file name with extension" },
                { "partNumber": 1, "description": "part number" },
                { "uploadId": "upload id", "description": "upload id" }
            ],
            "response": [
                { "url": "signed url", "description": "signed url" },
                { "expiresAt": "expiry date time", "description": "when the signed url stops working" }
            ]
        },
        {
            "endPoint": "/complete-multipart-upload",
            "method": "POST",
            "description": "Complete multipart upload",
            "body": [
                { "uploadId": "upload id", "description": "upload id" },
                { "parts": [ { "ETag": "etag", "PartNumber": 1 } ], "description": "parts" }
            ],
            "response": [
                { "message": COMPLETED_MESSAGE, "description": "message" },
                { "endDateTime": "end date time", "description": "end date time" },
                { "key": "object key", "description": "storage key of the assembled object" }
            ]
        },
        {
            "endPoint": "/abort-multipart-upload",
            "method": "POST",
            "description": "Abort multipart upload and discard uploaded parts",
            "body": [
                { "uploadId": "upload id", "description": "upload id" }
            ],
            "response": [
                { "message": ABORTED_MESSAGE, "description": "message" },
                { "key": "object key", "description": "storage key of the discarded upload" }
            ]
        }
    ])
}
