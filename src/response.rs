//! HTTP rendering of operation results.

use crate::service::OperationOutput;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

impl IntoResponse for OperationOutput {
    fn into_response(self) -> Response {
        match self {
            OperationOutput::One(doc) => (StatusCode::OK, Json(Value::Object(doc))).into_response(),
            OperationOutput::Page(page) => (StatusCode::OK, Json(page)).into_response(),
            OperationOutput::Keys(keys) => (StatusCode::OK, Json(keys)).into_response(),
            OperationOutput::Ack(ack) => (StatusCode::OK, Json(ack)).into_response(),
            OperationOutput::Empty => StatusCode::OK.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ListPage;
    use crate::store::WriteResult;
    use axum::body::to_bytes;
    use serde_json::json;

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn page_renders_unbounded_limit_as_null() {
        let page = ListPage {
            results: vec![json!({"name": "a"})],
            total: 1,
            offset: 0,
            limit: None,
        };
        let res = OperationOutput::Page(page).into_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            body_json(res).await,
            json!({"results": [{"name": "a"}], "total": 1, "offset": 0, "limit": null})
        );
    }

    #[tokio::test]
    async fn keys_are_json_and_edit_is_empty() {
        let res = OperationOutput::Keys(vec![json!("k1")]).into_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await, json!(["k1"]));

        let res = OperationOutput::Empty.into_response();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        let res = OperationOutput::Ack(WriteResult {
            deleted: 2,
            ..Default::default()
        })
        .into_response();
        assert_eq!(body_json(res).await["deleted"], json!(2));
    }
}
