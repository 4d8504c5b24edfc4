//! Media downloads from CDN URLs.

use bytes::Bytes;
use igmirror_core::ApiError;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// GET `url` and return the body. Any non-2xx status is an error.
pub async fn fetch_bytes(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Downloaded, ApiError> {
    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body: serde_json::json!({}),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await.map_err(transport_error)?;

    Ok(Downloaded {
        bytes,
        content_type,
    })
}

/// Extension from the URL path, else guessed from the content type.
pub fn file_extension(url: &str, content_type: Option<&str>) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    if let Some((_, ext)) = last.rsplit_once('.') {
        if !ext.is_empty() {
            return ext.to_lowercase();
        }
    }

    let content_type = content_type.unwrap_or_default();
    if content_type.contains("image") {
        "jpg".to_string()
    } else if content_type.contains("video") {
        "mp4".to_string()
    } else {
        "bin".to_string()
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e)
    } else {
        ApiError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extension_from_url_path() {
        assert_eq!(
            file_extension("https://cdn.example.com/v/t51/abc.JPG?stp=dst&_nc=1", None),
            "jpg"
        );
        assert_eq!(
            file_extension("https://cdn.example.com/o1/v/clip.mp4", Some("image/jpeg")),
            "mp4"
        );
    }

    #[test]
    fn test_extension_from_content_type() {
        let url = "https://cdn.example.com/media/12345";
        assert_eq!(file_extension(url, Some("image/webp")), "jpg");
        assert_eq!(file_extension(url, Some("video/mp4")), "mp4");
        assert_eq!(file_extension(url, Some("application/octet-stream")), "bin");
        assert_eq!(file_extension(url, None), "bin");
    }

    #[tokio::test]
    async fn test_fetch_bytes_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(b"jpegdata".to_vec()),
            )
            .mount(&server)
            .await;

        let d = fetch_bytes(
            &reqwest::Client::new(),
            &format!("{}/a.jpg", server.uri()),
            DOWNLOAD_TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(&d.bytes[..], b"jpegdata");
        assert_eq!(d.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_fetch_bytes_non_2xx_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetch_bytes(&reqwest::Client::new(), &server.uri(), DOWNLOAD_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
    }
}
