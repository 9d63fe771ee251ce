//! Loading the binary payload named by `initializationOptions.payloadUrl`

use serde_json::Value;
use tower_lsp::lsp_types::Url;
use tracing::info;

use crate::capability::{Capability, Environment};
use crate::error::BridgeError;

const PAYLOAD_URL_KEY: &str = "payloadUrl";

/// Payload locator from the opaque initialization options, if any
pub fn payload_url(initialization_options: &Value) -> Result<Option<Url>, BridgeError> {
    let Some(raw) = initialization_options.get(PAYLOAD_URL_KEY) else {
        return Ok(None);
    };

    let Some(raw) = raw.as_str() else {
        return Err(BridgeError::Malformed(format!(
            "`{}` must be a string",
            PAYLOAD_URL_KEY
        )));
    };

    Url::parse(raw)
        .map(Some)
        .map_err(|e| BridgeError::Malformed(format!("invalid `{}`: {}", PAYLOAD_URL_KEY, e)))
}

/// Fetches the payload bytes.
///
/// `http(s)` works everywhere; `file` needs filesystem access and so only
/// works natively.
pub async fn load(url: &Url, environment: Environment) -> Result<Vec<u8>, BridgeError> {
    info!("Loading backend payload from {}", url);

    match url.scheme() {
        "file" => {
            if environment != Environment::Native {
                return Err(BridgeError::unsupported(
                    Capability::ReadToString,
                    environment,
                ));
            }
            let path = url
                .to_file_path()
                .map_err(|_| BridgeError::InvalidResource(url.clone()))?;
            Ok(tokio::fs::read(path).await?)
        }
        "http" | "https" => {
            let response = reqwest::get(url.as_str()).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(BridgeError::HttpStatus {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                });
            }
            Ok(response.bytes().await?.to_vec())
        }
        _ => Err(BridgeError::InvalidResource(url.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn payload_url_is_optional() {
        assert_eq!(payload_url(&json!({"todoKeywords": ["TODO"]})).unwrap(), None);
        assert_eq!(payload_url(&Value::Null).unwrap(), None);
    }

    #[test]
    fn payload_url_must_be_a_url_string() {
        assert!(matches!(
            payload_url(&json!({"payloadUrl": 42})),
            Err(BridgeError::Malformed(_))
        ));
        assert!(matches!(
            payload_url(&json!({"payloadUrl": "not a url"})),
            Err(BridgeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn loads_file_payload_natively() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("backend.wasm");
        std::fs::write(&path, b"\0asm").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let bytes = load(&url, Environment::Native).await.unwrap();

        assert_eq!(bytes, b"\0asm");
    }

    #[tokio::test]
    async fn file_payload_is_unsupported_when_sandboxed() {
        let url = Url::parse("file:///opt/backend.wasm").unwrap();

        let result = load(&url, Environment::Sandboxed).await;

        assert!(matches!(result, Err(BridgeError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn loads_http_payload_in_any_environment() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/backend.wasm")
            .with_status(200)
            .with_body(b"\0asm")
            .create_async()
            .await;
        let url = Url::parse(&format!("{}/backend.wasm", server.url())).unwrap();

        let bytes = load(&url, Environment::Sandboxed).await.unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, b"\0asm");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.wasm")
            .with_status(404)
            .with_body("gone")
            .create_async()
            .await;
        let url = Url::parse(&format!("{}/missing.wasm", server.url())).unwrap();

        let result = load(&url, Environment::Native).await;

        assert!(matches!(
            result,
            Err(BridgeError::HttpStatus { status: 404, .. })
        ));
    }
}
