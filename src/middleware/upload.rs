use axum::extract::{FromRequest, Multipart, Request};

use crate::{
    error::ApiError,
    models::upload::{FormFields, UploadMap},
    services::{multipart::MultipartDecoder, uploads::ProcessedForm},
    AppState,
};

/// A multipart body whose files have all been uploaded to object storage.
///
/// Being a body extractor, it runs after every parts extractor of the
/// handler, so an unauthenticated request is rejected before its body is read.
#[derive(Debug)]
pub struct UploadedForm {
    pub fields: FormFields,
    pub uploads: UploadMap,
}

impl FromRequest<AppState> for UploadedForm {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

        let ProcessedForm { fields, uploads } = state
            .uploads
            .process(MultipartDecoder::new(multipart))
            .await?;
        Ok(Self { fields, uploads })
    }
}
