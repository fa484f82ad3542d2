//! Request body extraction with the service's error format.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};

use crate::error::ApiError;

/// JSON body extractor whose rejections are `400 {"error": ...}` responses.
///
/// Axum's own `Json` answers shape errors with `422` and a plain-text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Restock {
        quantity: u32,
    }

    fn json_request(body: &str) -> Request {
        Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_well_formed_body() {
        let ApiJson(body) = ApiJson::<Restock>::from_request(json_request(r#"{"quantity":3}"#), &())
            .await
            .unwrap();
        assert_eq!(body.quantity, 3);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_bad_request() {
        let result =
            ApiJson::<Restock>::from_request(json_request(r#"{"quantity":-1}"#), &()).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = ApiJson::<Restock>::from_request(json_request("{not json"), &()).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let req = Request::builder()
            .method("POST")
            .body(Body::from(r#"{"quantity":3}"#))
            .unwrap();
        let result = ApiJson::<Restock>::from_request(req, &()).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
