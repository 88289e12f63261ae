use crate::config::GatewayConfig;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use gateway_core::models::{NewApplication, NewCredential, NewUser};
use gateway_core::secret::generate_id;
use gateway_core::{AccessTokenClaims, CredentialStore};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

/// Test fixture for driving the whole router against a mocked backend.
///
/// The configuration routes `/authorizedPath` through an `oauth2` policy and
/// then a `proxy` policy to `backend`.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let client = fixture.provision_client(&["read"]).await;
///     let token = fixture.access_token(&client, None).await;
///
///     Mock::given(matchers::path("/authorizedPath"))
///         .respond_with(ResponseTemplate::new(200))
///         .mount(&fixture.backend)
///         .await;
///
///     fixture.get_with_token("/authorizedPath", &token).await.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration the router was built from
    pub config: GatewayConfig,
    /// Shared state, for provisioning the credential store directly
    pub state: AppState,
    /// Mock server standing in for the proxied service
    pub backend: MockServer,
}

/// A provisioned OAuth2 client
#[derive(Debug, Clone)]
pub struct TestClient {
    pub id: String,
    pub secret: String,
    pub consumer_id: String,
}

impl TestFixture {
    /// Creates a fixture with an in-memory store and a fresh backend mock
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let backend = MockServer::start().await;
        let config = GatewayConfig::for_test_with_backend(&backend);
        Self::with_config(config, backend)
    }

    /// Creates a fixture from a customised configuration
    pub fn with_config(config: GatewayConfig, backend: MockServer) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let state = AppState::for_testing(&config);
        let app = create_app(state.clone());

        Self {
            app,
            config,
            state,
            backend,
        }
    }

    /// Initializes the test logger; later calls are no-ops
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Registers `scopes` and creates a user, an application and a credential
    /// granted those scopes
    pub async fn provision_client(&self, scopes: &[&str]) -> TestClient {
        let store = &self.state.store;
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        store
            .insert_scopes(&scopes)
            .await
            .expect("Failed to insert scopes");

        let user = store
            .insert_user(NewUser {
                username: format!("user-{}", generate_id()),
                ..Default::default()
            })
            .await
            .expect("Failed to insert user");
        let application = store
            .insert_application(
                &user.id,
                NewApplication {
                    name: "test-app".to_string(),
                    redirect_uri: None,
                },
            )
            .await
            .expect("Failed to insert application");
        let issued = store
            .insert_credential(
                &application.id,
                NewCredential {
                    secret: None,
                    scopes,
                },
            )
            .await
            .expect("Failed to insert credential");

        TestClient {
            id: issued.credential.id,
            secret: issued.secret,
            consumer_id: application.id,
        }
    }

    /// Requests a token with form-encoded body credentials
    pub async fn request_token(&self, client: &TestClient, scope: Option<&str>) -> TestResponse {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client.id.as_str()),
            ("client_secret", client.secret.as_str()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }
        self.post_form("/oauth2/token", &form, &[]).await
    }

    /// Requests a token and returns the access token string
    pub async fn access_token(&self, client: &TestClient, scope: Option<&str>) -> String {
        let response = self.request_token(client, scope).await;
        response.assert_ok();
        response.json["access_token"]
            .as_str()
            .expect("Token response has no access_token")
            .to_string()
    }

    /// Verifies a token with the configured key, issuer and audience
    pub fn decode(&self, token: &str) -> AccessTokenClaims {
        let tokens = &self.config.access_tokens;
        tokens
            .codec()
            .expect("Failed to build codec")
            .decode(token, &tokens.issuer, &tokens.audience)
            .expect("Failed to decode token")
    }

    /// Creates a request builder for the given method and URI
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    /// Sends a GET request without credentials
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        self.get_with_headers(uri, &[]).await
    }

    /// Sends a GET request carrying a bearer token
    pub async fn get_with_token(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        let authorization = format!("Bearer {token}");
        self.get_with_headers(uri, &[("Authorization", authorization.as_str())])
            .await
    }

    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::empty())
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a POST request with a JSON body
    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        self.post_with_headers(uri, body, &[]).await
    }

    /// Sends a POST request with a JSON body and custom headers
    pub async fn post_with_headers<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(json_body))
            .expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a POST request with a form-encoded body and custom headers
    pub async fn post_form(
        &self,
        uri: impl AsRef<str>,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("Failed to build request");

        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }
}

/// Response from a test request that provides convenient access to status,
/// headers and JSON body.
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    /// Asserts that the response status is OK (200).
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Asserts that a header is present with exactly the expected value.
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let value = self
            .headers
            .get(name)
            .unwrap_or_else(|| panic!("Missing header {name}"));
        assert_eq!(
            value.to_str().unwrap_or_default(),
            expected,
            "Unexpected value for header {name}"
        );
        self
    }

    /// Converts the response body to the specified type.
    ///
    /// # Panics
    ///
    /// Panics if the JSON cannot be deserialized to the specified type.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).unwrap_or_else(|e| {
            panic!(
                "Failed to deserialize response: {}\nResponse body: {}",
                e,
                serde_json::to_string_pretty(&self.json).unwrap_or_default()
            )
        })
    }
}
