// Renderer and server capability probing

use axum::{http::StatusCode, Json};
use serde::Serialize;

use super::ApiError;
use crate::upnp::feature_list::{parse_feature_list, video_container_ids, Feature};

#[derive(Debug, Serialize)]
pub struct FeatureReport {
    pub features: Vec<Feature>,
    pub video_containers: Vec<String>,
}

/// POST /upnp/features: body is a raw or SOAP-wrapped X_GetFeatureList response
pub async fn parse_features(body: String) -> Result<Json<FeatureReport>, ApiError> {
    let features = parse_feature_list(&body)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("{:#}", e)))?;
    let video_containers = video_container_ids(&features);
    Ok(Json(FeatureReport {
        features,
        video_containers,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::{routes, tests::test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn post_xml(xml: &str) -> (StatusCode, serde_json::Value) {
        let state = test_state().await;
        let response = routes()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upnp/features")
                    .header("content-type", "text/xml")
                    .body(Body::from(xml.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    #[tokio::test]
    async fn test_feature_report() {
        let xml = r#"<Features><Feature name="samsung.com_BASICVIEW" version="1">
<container id="A" type="object.item.audioItem"/>
<container id="V" type="object.item.videoItem"/>
</Feature></Features>"#;

        let (status, body) = post_xml(xml).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["features"][0]["name"], "samsung.com_BASICVIEW");
        assert_eq!(body["video_containers"], serde_json::json!(["V"]));
    }

    #[tokio::test]
    async fn test_malformed_feature_list() {
        let (status, _) = post_xml("<Features><Feature name=\"x\"></Features>").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
