//! Client of the billing service's session based REST API.
//!
//! Every authenticated call obtains its token from the [`SessionCache`]. Transport
//! failures are retried with backoff. If the service rejects the session before its
//! lease ran out, the token is invalidated and the call is repeated exactly once with a
//! fresh login.

use crate::backup::window::ExportWindow;
use crate::config::BillingSettings;
use crate::errors::{ErrorKind, ResultExt};
use crate::kind_bail;
use crate::session::{Login, SessionCache};
use crate::tools::retry::{RetryPolicy, with_retry};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use model::{
    AuthInfo, BillingFault, CallRecord, Credentials, LoginRequest, LoginResponse,
    RecordingQuery, XdrListResponse, XdrQuery, customer_param,
};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;

pub mod model;

const LOGIN_PATH: &str = "/rest/Session/login";
const XDRS_PATH: &str = "/rest/Customer/get_customer_xdrs";
const RECORDING_PATH: &str = "/rest/CDR/get_call_recording";

/// Only recordings billed with this model are listed.
const BILLING_MODEL: i32 = 1;

/// Read access to call records and their recordings.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Lists the records of `customer` which carry a recording and fall into `window`.
    async fn list_records(
        &self,
        customer: &str,
        window: &ExportWindow,
    ) -> anyhow::Result<Vec<CallRecord>>;

    /// Downloads the raw audio of a single record.
    async fn fetch_recording(&self, i_xdr: i64) -> anyhow::Result<Bytes>;
}

/// Builds the HTTP client shared by the credential exchange and the billing client.
pub fn http_client(settings: &BillingSettings) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.timeout)
        .user_agent(format!(
            "{}/{}",
            crate::APP_NAME.as_str(),
            crate::APP_VERSION.as_str()
        ))
        .build()
        .context("Failed to set up the billing HTTP client")
}

/// Obtains new session tokens using the operator credentials.
pub struct CredentialExchange {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    retry: RetryPolicy,
}

impl CredentialExchange {
    pub fn new(http: reqwest::Client, settings: &BillingSettings) -> Self {
        Self {
            http,
            base_url: settings.base_url.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            retry: RetryPolicy::new(settings.retry_attempts),
        }
    }

    async fn try_login(&self) -> anyhow::Result<String> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        let request = LoginRequest {
            params: Credentials {
                login: &self.username,
                password: &self.password,
            },
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))
            .mark_transport()?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("Failed to read the login response")
            .mark_transport()?;

        if !status.is_success() {
            // Rejected credentials come back as a fault, usually with a 500.
            if let Some(fault) = BillingFault::parse(&body) {
                kind_bail!(ErrorKind::Auth, "Login was rejected with {}: {}", status, fault);
            }
            if is_transient(status) {
                kind_bail!(
                    ErrorKind::Transport,
                    "Login answered {}: {}",
                    status,
                    describe_failure(&body)
                );
            }
            kind_bail!(
                ErrorKind::Auth,
                "Login was rejected with {}: {}",
                status,
                describe_failure(&body)
            );
        }

        let response: LoginResponse = serde_json::from_slice(&body)
            .context("Failed to parse the login response")
            .mark_decode()?;

        match response.session_id {
            Some(session_id) if !session_id.is_empty() => Ok(session_id),
            _ => kind_bail!(ErrorKind::Decode, "No session_id in the login response"),
        }
    }
}

#[async_trait]
impl Login for CredentialExchange {
    #[tracing::instrument(level = "debug", skip(self), fields(user = self.username.as_str()), err(Display))]
    async fn login(&self) -> anyhow::Result<String> {
        with_retry(self.retry, "login", || self.try_login()).await
    }
}

/// Outcome of a single authenticated request.
enum Reply {
    Accepted(Bytes),
    SessionRejected(String),
}

pub struct BillingClient {
    http: reqwest::Client,
    base_url: String,
    sessions: Arc<SessionCache>,
    retry: RetryPolicy,
}

impl BillingClient {
    pub fn new(
        http: reqwest::Client,
        settings: &BillingSettings,
        sessions: Arc<SessionCache>,
    ) -> Self {
        Self {
            http,
            base_url: settings.base_url.clone(),
            sessions,
            retry: RetryPolicy::new(settings.retry_attempts),
        }
    }

    async fn call<P: Serialize>(
        &self,
        operation: &str,
        path: &str,
        params: &P,
    ) -> anyhow::Result<Bytes> {
        let params =
            serde_json::to_string(params).context("Failed to encode the request parameters")?;

        with_retry(self.retry, operation, || {
            self.call_with_session(path, &params)
        })
        .await
    }

    async fn call_with_session(&self, path: &str, params: &str) -> anyhow::Result<Bytes> {
        let token = self.sessions.get_or_create().await?;

        let reason = match self.post(path, &token, params).await? {
            Reply::Accepted(body) => return Ok(body),
            Reply::SessionRejected(reason) => reason,
        };

        tracing::info!(
            path,
            "Billing session was rejected ({}), logging in again...",
            reason
        );
        self.sessions.invalidate(&token).await;
        let token = self.sessions.get_or_create().await?;

        match self.post(path, &token, params).await? {
            Reply::Accepted(body) => Ok(body),
            Reply::SessionRejected(reason) => kind_bail!(
                ErrorKind::Auth,
                "Billing service rejected a fresh session: {}",
                reason
            ),
        }
    }

    async fn post(&self, path: &str, token: &str, params: &str) -> anyhow::Result<Reply> {
        let url = format!("{}{}", self.base_url, path);
        let auth_info = serde_json::to_string(&AuthInfo { session_id: token })
            .context("Failed to encode auth_info")?;

        let response = self
            .http
            .post(&url)
            .form(&[("auth_info", auth_info.as_str()), ("params", params)])
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))
            .mark_transport()?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read the response of {}", url))
            .mark_transport()?;

        if status.is_success() {
            return Ok(Reply::Accepted(body));
        }

        let fault = BillingFault::parse(&body);
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || fault.as_ref().is_some_and(BillingFault::is_session_fault)
        {
            return Ok(Reply::SessionRejected(describe_failure(&body)));
        }

        match fault {
            Some(fault) => kind_bail!(ErrorKind::Decode, "{} failed: {}", path, fault),
            None if is_transient(status) => kind_bail!(
                ErrorKind::Transport,
                "{} answered {}: {}",
                path,
                status,
                describe_failure(&body)
            ),
            None => kind_bail!(
                ErrorKind::Decode,
                "{} was rejected with {}: {}",
                path,
                status,
                describe_failure(&body)
            ),
        }
    }
}

#[async_trait]
impl BillingApi for BillingClient {
    #[tracing::instrument(level = "debug", skip(self, window), err(Display))]
    async fn list_records(
        &self,
        customer: &str,
        window: &ExportWindow,
    ) -> anyhow::Result<Vec<CallRecord>> {
        let query = XdrQuery {
            billing_model: BILLING_MODEL,
            call_recording: 1,
            from_date: window.from_param(),
            to_date: window.to_param(),
            i_customer: customer_param(customer),
        };

        let body = self
            .call("list_records", XDRS_PATH, &query)
            .await
            .with_context(|| format!("Failed to list the records of customer {}", customer))?;

        let response: XdrListResponse = serde_json::from_slice(&body)
            .with_context(|| format!("Malformed record list for customer {}", customer))
            .mark_decode()?;

        tracing::debug!(
            customer,
            records = response.xdr_list.len(),
            "Listed records for {}",
            window
        );

        Ok(response.xdr_list)
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn fetch_recording(&self, i_xdr: i64) -> anyhow::Result<Bytes> {
        let body = self
            .call("fetch_recording", RECORDING_PATH, &RecordingQuery { i_xdr })
            .await
            .with_context(|| format!("Failed to fetch the recording of record {}", i_xdr))?;

        if body.is_empty() {
            kind_bail!(
                ErrorKind::Decode,
                "Billing service returned an empty recording for record {}",
                i_xdr
            );
        }

        Ok(body)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Renders an error body for logging, preferring the billing fault if present.
fn describe_failure(body: &[u8]) -> String {
    if let Some(fault) = BillingFault::parse(body) {
        return fault.to_string();
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "empty response".to_string()
    } else {
        text.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::error_kind;
    use crate::session::memory::MemorySessionStore;
    use crate::session::{SESSION_KEY, SESSION_TTL, SessionStore};
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warp::Filter;
    use warp::Reply as _;
    use warp::reply::Response;

    const RECORDING: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";
    const EMPTY_RECORDING: i64 = 777;
    const MISSING_RECORDING: i64 = 404;

    struct FakeBilling {
        logins: AtomicUsize,
        session: Mutex<Option<String>>,
        login_status: warp::http::StatusCode,
        login_body: Option<Value>,
        xdrs_body: Value,
        queries: Mutex<Vec<Value>>,
    }

    impl Default for FakeBilling {
        fn default() -> Self {
            Self {
                logins: AtomicUsize::new(0),
                session: Mutex::new(None),
                login_status: warp::http::StatusCode::OK,
                login_body: None,
                xdrs_body: json!({"xdr_list": [{"i_xdr": 555, "CLI": "100"}]}),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    impl FakeBilling {
        fn login(&self, body: Value) -> Response {
            assert_eq!(body["params"]["login"], "operator");
            assert_eq!(body["params"]["password"], "secret");

            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            if self.login_status != warp::http::StatusCode::OK {
                return fault("Server.Session.login.auth_failed", self.login_status);
            }

            let body = self.login_body.clone().unwrap_or_else(|| {
                let session = format!("session-{}", n);
                *self.session.lock().unwrap() = Some(session.clone());
                json!({ "session_id": session })
            });

            warp::reply::json(&body).into_response()
        }

        fn authorize(&self, form: &HashMap<String, String>) -> Result<Value, Response> {
            let auth: Value = serde_json::from_str(&form["auth_info"]).unwrap();
            let current = self.session.lock().unwrap().clone();

            if current.is_none() || current.as_deref() != auth["session_id"].as_str() {
                return Err(fault(
                    "Server.Session.check_auth.auth_failed",
                    warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                ));
            }

            Ok(serde_json::from_str(&form["params"]).unwrap())
        }

        fn list(&self, form: HashMap<String, String>) -> Response {
            match self.authorize(&form) {
                Ok(params) => {
                    self.queries.lock().unwrap().push(params);
                    warp::reply::json(&self.xdrs_body).into_response()
                }
                Err(rejection) => rejection,
            }
        }

        fn recording(&self, form: HashMap<String, String>) -> Response {
            match self.authorize(&form) {
                Ok(params) => match params["i_xdr"].as_i64() {
                    Some(EMPTY_RECORDING) => Vec::<u8>::new().into_response(),
                    Some(MISSING_RECORDING) => fault(
                        "Server.CDR.recording_not_found",
                        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                    _ => RECORDING.to_vec().into_response(),
                },
                Err(rejection) => rejection,
            }
        }
    }

    fn fault(code: &str, status: warp::http::StatusCode) -> Response {
        warp::reply::with_status(
            warp::reply::json(&json!({ "faultcode": code, "faultstring": "rejected" })),
            status,
        )
        .into_response()
    }

    async fn serve(fake: Arc<FakeBilling>) -> String {
        let login = warp::post()
            .and(warp::path!("rest" / "Session" / "login"))
            .and(warp::body::json())
            .map({
                let fake = fake.clone();
                move |body: Value| fake.login(body)
            });
        let xdrs = warp::post()
            .and(warp::path!("rest" / "Customer" / "get_customer_xdrs"))
            .and(warp::body::form())
            .map({
                let fake = fake.clone();
                move |form: HashMap<String, String>| fake.list(form)
            });
        let recording = warp::post()
            .and(warp::path!("rest" / "CDR" / "get_call_recording"))
            .and(warp::body::form())
            .map(move |form: HashMap<String, String>| fake.recording(form));

        let (addr, server) =
            warp::serve(login.or(xdrs).or(recording)).bind_ephemeral(([127, 0, 0, 1], 0));
        let _ = tokio::spawn(server);

        format!("http://{}", addr)
    }

    fn settings(base_url: &str) -> BillingSettings {
        BillingSettings {
            base_url: base_url.to_string(),
            username: "operator".to_string(),
            password: "secret".to_string(),
            timeout: Duration::from_secs(5),
            retry_attempts: 1,
        }
    }

    fn client(base_url: &str) -> (BillingClient, Arc<MemorySessionStore>) {
        let settings = settings(base_url);
        let http = http_client(&settings).unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let exchange = Arc::new(CredentialExchange::new(http.clone(), &settings));
        let sessions = Arc::new(SessionCache::new(store.clone(), exchange));

        (BillingClient::new(http, &settings, sessions), store)
    }

    fn window() -> ExportWindow {
        ExportWindow::for_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn lists_records_of_the_window() {
        let fake = Arc::new(FakeBilling::default());
        let (client, _) = client(&serve(fake.clone()).await);

        let records = client.list_records("4821", &window()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].i_xdr, 555);
        assert_eq!(records[0].cli.as_deref(), Some("100"));

        let queries = fake.queries.lock().unwrap();
        assert_eq!(
            queries[0],
            json!({
                "billing_model": 1,
                "call_recording": 1,
                "from_date": "2024-03-01 00:00:00",
                "to_date": "2024-03-01 23:59:59",
                "i_customer": 4821,
            })
        );
    }

    #[tokio::test]
    async fn missing_record_list_is_empty() {
        let fake = Arc::new(FakeBilling {
            xdrs_body: json!({}),
            ..Default::default()
        });
        let (client, _) = client(&serve(fake).await);

        assert!(client.list_records("4821", &window()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_records_are_decode_errors() {
        let fake = Arc::new(FakeBilling {
            xdrs_body: json!({"xdr_list": [{"i_xdr": "555"}]}),
            ..Default::default()
        });
        let (client, _) = client(&serve(fake).await);

        let err = client.list_records("4821", &window()).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Decode));
    }

    #[tokio::test]
    async fn sessions_are_reused_across_calls() {
        let fake = Arc::new(FakeBilling::default());
        let (client, store) = client(&serve(fake.clone()).await);

        client.list_records("4821", &window()).await.unwrap();
        client.fetch_recording(555).await.unwrap();
        client.list_records("4822", &window()).await.unwrap();

        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(SESSION_KEY).await.unwrap().as_deref(),
            Some("session-1")
        );
    }

    #[tokio::test]
    async fn rejected_sessions_trigger_a_single_relogin() {
        let fake = Arc::new(FakeBilling::default());
        let (client, store) = client(&serve(fake.clone()).await);
        store.put(SESSION_KEY, "stale", SESSION_TTL).await.unwrap();

        let records = client.list_records("4821", &window()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(SESSION_KEY).await.unwrap().as_deref(),
            Some("session-1")
        );
    }

    #[tokio::test]
    async fn sessions_rejected_twice_are_auth_errors() {
        // The login hands out a token the service does not accept afterwards.
        let fake = Arc::new(FakeBilling {
            login_body: Some(json!({"session_id": "never-valid"})),
            ..Default::default()
        });
        let (client, _) = client(&serve(fake.clone()).await);

        let err = client.list_records("4821", &window()).await.unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Auth));
        assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetches_recordings() {
        let fake = Arc::new(FakeBilling::default());
        let (client, _) = client(&serve(fake).await);

        let audio = client.fetch_recording(555).await.unwrap();
        assert_eq!(audio.as_ref(), RECORDING);
    }

    #[tokio::test]
    async fn empty_recordings_are_rejected() {
        let fake = Arc::new(FakeBilling::default());
        let (client, _) = client(&serve(fake).await);

        let err = client.fetch_recording(EMPTY_RECORDING).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Decode));
    }

    #[tokio::test]
    async fn billing_faults_are_surfaced() {
        let fake = Arc::new(FakeBilling::default());
        let (client, _) = client(&serve(fake).await);

        let err = client.fetch_recording(MISSING_RECORDING).await.unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Decode));
        assert!(format!("{:#}", err).contains("Server.CDR.recording_not_found"));
    }

    #[tokio::test]
    async fn failed_logins_are_auth_errors() {
        let fake = Arc::new(FakeBilling {
            login_status: warp::http::StatusCode::UNAUTHORIZED,
            ..Default::default()
        });
        let (client, _) = client(&serve(fake).await);

        let err = client.list_records("4821", &window()).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Auth));
    }

    #[tokio::test]
    async fn rejected_credentials_are_not_retried() {
        let fake = Arc::new(FakeBilling {
            login_status: warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            ..Default::default()
        });
        let settings = BillingSettings {
            retry_attempts: 3,
            ..settings(&serve(fake.clone()).await)
        };
        let exchange = CredentialExchange::new(http_client(&settings).unwrap(), &settings);

        let err = exchange.login().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Auth));
        assert!(format!("{:#}", err).contains("Server.Session.login.auth_failed"));
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_without_session_id_is_rejected() {
        let fake = Arc::new(FakeBilling {
            login_body: Some(json!({"session_id": ""})),
            ..Default::default()
        });
        let settings = settings(&serve(fake).await);
        let exchange = CredentialExchange::new(http_client(&settings).unwrap(), &settings);

        let err = exchange.login().await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Decode));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        let (client, store) = client("http://127.0.0.1:1");
        store.put(SESSION_KEY, "cached", SESSION_TTL).await.unwrap();

        let err = client.fetch_recording(555).await.unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Transport));
    }
}
