use axum::extract::Request;

use crate::error::{Error, ErrorDetails};

pub async fn handle_404(req: Request) -> Error {
    Error::new(ErrorDetails::RouteNotFound {
        path: req.uri().path().to_string(),
        method: req.method().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_handle_404() {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/v1/nothing")
            .body(axum::body::Body::empty())
            .unwrap();

        let error = handle_404(request).await;
        assert_eq!(
            *error.get_details(),
            ErrorDetails::RouteNotFound {
                path: "/v1/nothing".to_string(),
                method: "DELETE".to_string(),
            }
        );
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }
}
