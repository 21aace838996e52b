//! B2-style object store backend
//!
//! Thin wrapper around `reqwest::blocking::Client` for a B2-compatible
//! native JSON API: authorize-account with an account key pair, paginated
//! `b2_list_file_names`, `b2_get_upload_url` + single-call whole-object
//! upload, and `b2_delete_file_version`.
//!
//! Uploads record the local SHA-256 as object file info under the `sha256`
//! key, so listings of objects this tool wrote return a digest directly
//! comparable to local manifests. Objects written by other tools may lack
//! it; the planner falls back to its size/mtime heuristic for those.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ObjectStore, RemoteObject, StoreError};

/// Environment variable holding the account key id
pub const ENV_KEY_ID: &str = "CROSSDOCK_KEY_ID";

/// Environment variable holding the application key
pub const ENV_APP_KEY: &str = "CROSSDOCK_APP_KEY";

/// Optional override for the authorization endpoint (used against
/// compatible gateways)
pub const ENV_API_BASE: &str = "CROSSDOCK_API_URL";

const DEFAULT_API_BASE: &str = "https://api.backblazeb2.com";

/// Objects requested per listing page
const LIST_PAGE_SIZE: u32 = 1000;

/// File-info key the local digest is stored under
const SHA256_INFO_KEY: &str = "sha256";

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesResponse {
    files: Vec<RemoteFileInfo>,
    next_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFileInfo {
    file_name: String,
    file_id: String,
    content_length: u64,
    upload_timestamp: i64,
    #[serde(default)]
    file_info: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    file_id: String,
    file_name: String,
}

// ---------------------------------------------------------------------------
// B2Store
// ---------------------------------------------------------------------------

/// B2-style store client.
///
/// Authorization happens once in the constructor; the resulting API URL,
/// token and bucket id are immutable afterwards, so the client is safe to
/// share across upload worker threads. File-name → file-id mappings seen in
/// listings and uploads are cached for deletes.
pub struct B2Store {
    client: reqwest::blocking::Client,
    api_url: String,
    auth_token: String,
    account_id: String,
    bucket_id: String,
    bucket_name: String,
    file_ids: Mutex<HashMap<String, String>>,
}

impl B2Store {
    /// Connect using credentials from the environment
    /// (`CROSSDOCK_KEY_ID` / `CROSSDOCK_APP_KEY`, with the B2-native
    /// variable names accepted as fallback).
    pub fn from_env(bucket: &str) -> Result<Self, StoreError> {
        let key_id = env::var(ENV_KEY_ID)
            .or_else(|_| env::var("B2_APPLICATION_KEY_ID"))
            .map_err(|_| {
                StoreError::Auth(format!(
                    "no credentials: set {} and {}",
                    ENV_KEY_ID, ENV_APP_KEY
                ))
            })?;
        let app_key = env::var(ENV_APP_KEY)
            .or_else(|_| env::var("B2_APPLICATION_KEY"))
            .map_err(|_| {
                StoreError::Auth(format!(
                    "no credentials: set {} and {}",
                    ENV_KEY_ID, ENV_APP_KEY
                ))
            })?;
        let api_base = env::var(ENV_API_BASE).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::connect(&api_base, &key_id, &app_key, bucket)
    }

    /// Authorize against `api_base` and resolve `bucket` to its id.
    pub fn connect(
        api_base: &str,
        key_id: &str,
        app_key: &str,
        bucket: &str,
    ) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let base = api_base.trim_end_matches('/');
        let url = format!("{}/b2api/v2/b2_authorize_account", base);
        let resp = client
            .get(&url)
            .basic_auth(key_id, Some(app_key))
            .send()
            .map_err(connect_error)?;
        let auth: AuthorizeResponse = parse_body(map_response(resp)?)?;

        let mut store = Self {
            client,
            api_url: auth.api_url.trim_end_matches('/').to_string(),
            auth_token: auth.authorization_token,
            account_id: auth.account_id,
            bucket_id: String::new(),
            bucket_name: bucket.to_string(),
            file_ids: Mutex::new(HashMap::new()),
        };

        let buckets: ListBucketsResponse = store.post_json(
            "b2_list_buckets",
            &serde_json::json!({
                "accountId": store.account_id,
                "bucketName": bucket,
            }),
        )?;
        let found = buckets
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == bucket)
            .ok_or_else(|| StoreError::Destination(format!("bucket not found: '{}'", bucket)))?;
        store.bucket_id = found.bucket_id;

        Ok(store)
    }

    /// POST a JSON body to an API operation and parse the JSON response
    fn post_json<T: DeserializeOwned>(
        &self,
        op: &str,
        body: &serde_json::Value,
    ) -> Result<T, StoreError> {
        let url = format!("{}/b2api/v2/{}", self.api_url, op);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_token)
            .json(body)
            .send()
            .map_err(connect_error)?;
        parse_body(map_response(resp)?)
    }

    fn remember_file_id(&self, name: &str, id: &str) {
        if let Ok(mut ids) = self.file_ids.lock() {
            ids.insert(name.to_string(), id.to_string());
        }
    }

    /// File id for `key`, from the cache or a one-object listing.
    /// `Ok(None)` means the object does not exist.
    fn resolve_file_id(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Ok(ids) = self.file_ids.lock() {
            if let Some(id) = ids.get(key) {
                return Ok(Some(id.clone()));
            }
        }

        let page: ListFileNamesResponse = self.post_json(
            "b2_list_file_names",
            &serde_json::json!({
                "bucketId": self.bucket_id,
                "prefix": key,
                "maxFileCount": 1,
            }),
        )?;
        Ok(page
            .files
            .into_iter()
            .find(|f| f.file_name == key)
            .map(|f| f.file_id))
    }
}

impl ObjectStore for B2Store {
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StoreError> {
        let mut objects = Vec::new();
        let mut start_file_name: Option<String> = None;

        loop {
            let mut body = serde_json::json!({
                "bucketId": self.bucket_id,
                "maxFileCount": LIST_PAGE_SIZE,
            });
            if !prefix.is_empty() {
                body["prefix"] = serde_json::json!(format!("{}/", prefix.trim_end_matches('/')));
            }
            if let Some(ref start) = start_file_name {
                body["startFileName"] = serde_json::json!(start);
            }

            let page: ListFileNamesResponse = self.post_json("b2_list_file_names", &body)?;

            for file in page.files {
                self.remember_file_id(&file.file_name, &file.file_id);
                objects.push(RemoteObject {
                    key: file.file_name,
                    size: file.content_length,
                    sha256: file.file_info.get(SHA256_INFO_KEY).cloned(),
                    modified_at: DateTime::<Utc>::from_timestamp_millis(file.upload_timestamp),
                });
            }

            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => break,
            }
        }

        Ok(objects)
    }

    fn put(&self, key: &str, source: &Path, sha256: &str) -> Result<(), StoreError> {
        let upload: UploadUrlResponse = self.post_json(
            "b2_get_upload_url",
            &serde_json::json!({ "bucketId": self.bucket_id }),
        )?;

        let contents = std::fs::read(source)?;

        let resp = self
            .client
            .post(&upload.upload_url)
            .header("Authorization", &upload.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(key))
            .header("Content-Type", "b2/x-auto")
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .header(format!("X-Bz-Info-{}", SHA256_INFO_KEY), sha256)
            .body(contents)
            .send()
            .map_err(connect_error)?;
        let uploaded: UploadedFile = parse_body(map_response(resp)?)?;
        self.remember_file_id(&uploaded.file_name, &uploaded.file_id);

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let Some(file_id) = self.resolve_file_id(key)? else {
            // Already gone; delete is idempotent.
            return Ok(());
        };

        let result: Result<serde_json::Value, StoreError> = self.post_json(
            "b2_delete_file_version",
            &serde_json::json!({
                "fileName": key,
                "fileId": file_id,
            }),
        );

        if let Ok(mut ids) = self.file_ids.lock() {
            ids.remove(key);
        }

        match result {
            Ok(_) => Ok(()),
            // Deleted concurrently counts as success
            Err(StoreError::Api { status: 400, ref message }) if message.contains("not present") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

/// Map a transport-level failure (refused connection, timeout) to a
/// transient network error.
fn connect_error(e: reqwest::Error) -> StoreError {
    StoreError::Network(e.to_string())
}

/// Read a response body, mapping non-success statuses onto the error
/// taxonomy: 401/403 become fatal auth errors, everything else keeps its
/// status for transient classification.
fn map_response(resp: reqwest::blocking::Response) -> Result<String, StoreError> {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if status.is_success() {
        return Ok(body);
    }

    let message = extract_error_message(&body);
    match status.as_u16() {
        401 | 403 => Err(StoreError::Auth(message)),
        code => Err(StoreError::Api {
            status: code,
            message,
        }),
    }
}

fn parse_body<T: DeserializeOwned>(body: String) -> Result<T, StoreError> {
    serde_json::from_str(&body)
        .map_err(|e| StoreError::Protocol(format!("{} in body: {}", e, truncate(&body))))
}

/// Pull `message`/`code` out of a JSON error body, falling back to the raw
/// (truncated) body.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(s) = value
            .get("message")
            .or_else(|| value.get("code"))
            .and_then(|v| v.as_str())
        {
            return s.to_string();
        }
    }
    if body.is_empty() {
        return "no details provided".to_string();
    }
    truncate(body.trim())
}

fn truncate(s: &str) -> String {
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s.to_string()
    }
}

/// Percent-encode an object key for the `X-Bz-File-Name` header.
/// `/` separators stay literal.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// A minimal HTTP mock server. Binds to a random port, serves a fixed
    /// sequence of responses (one connection per request), and returns the
    /// captured requests for assertion.
    struct MockServer {
        addr: String,
        listener: TcpListener,
    }

    #[derive(Debug)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl CapturedRequest {
        fn header(&self, name: &str) -> Option<&str> {
            let lower = name.to_lowercase();
            self.headers
                .iter()
                .find(|(k, _)| k.to_lowercase() == lower)
                .map(|(_, v)| v.as_str())
        }

        fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
        }
    }

    impl MockServer {
        fn new() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
            Self { addr, listener }
        }

        fn url(&self) -> String {
            self.addr.clone()
        }

        /// Serve `responses` in order, one connection each, and return the
        /// captured requests.
        fn serve(self, responses: Vec<(u16, String)>) -> std::thread::JoinHandle<Vec<CapturedRequest>> {
            std::thread::spawn(move || {
                let mut captured = Vec::new();
                for (status, body) in responses {
                    let (mut stream, _) = self.listener.accept().unwrap();
                    let mut reader = BufReader::new(stream.try_clone().unwrap());

                    let mut request_line = String::new();
                    reader.read_line(&mut request_line).unwrap();
                    let parts: Vec<&str> = request_line.trim().split_whitespace().collect();
                    let method = parts.first().unwrap_or(&"").to_string();
                    let path = parts.get(1).unwrap_or(&"").to_string();

                    let mut headers = Vec::new();
                    let mut content_length: usize = 0;
                    loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).unwrap();
                        let trimmed = line.trim().to_string();
                        if trimmed.is_empty() {
                            break;
                        }
                        if let Some((key, value)) = trimmed.split_once(':') {
                            let k = key.trim().to_string();
                            let v = value.trim().to_string();
                            if k.to_lowercase() == "content-length" {
                                content_length = v.parse().unwrap_or(0);
                            }
                            headers.push((k, v));
                        }
                    }

                    let mut body_buf = vec![0u8; content_length];
                    if content_length > 0 {
                        reader.read_exact(&mut body_buf).unwrap();
                    }

                    let response = format!(
                        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    stream.write_all(response.as_bytes()).unwrap();
                    stream.flush().unwrap();

                    captured.push(CapturedRequest {
                        method,
                        path,
                        headers,
                        body: String::from_utf8_lossy(&body_buf).to_string(),
                    });
                }
                captured
            })
        }
    }

    fn auth_body(api_url: &str) -> String {
        format!(
            r#"{{"accountId":"acct1","authorizationToken":"tok_auth","apiUrl":"{api_url}","downloadUrl":"{api_url}"}}"#
        )
    }

    fn buckets_body() -> String {
        r#"{"buckets":[{"bucketId":"bkt1","bucketName":"releases","bucketType":"allPrivate"}]}"#
            .to_string()
    }

    fn connect_responses(url: &str) -> Vec<(u16, String)> {
        vec![(200, auth_body(url)), (200, buckets_body())]
    }

    #[test]
    fn connect_authorizes_and_resolves_bucket() {
        let server = MockServer::new();
        let url = server.url();
        let handle = server.serve(connect_responses(&url));

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        let requests = handle.join().unwrap();

        assert_eq!(store.bucket_id, "bkt1");
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/b2api/v2/b2_authorize_account");
        assert!(requests[0].header("Authorization").unwrap().starts_with("Basic "));

        assert_eq!(requests[1].path, "/b2api/v2/b2_list_buckets");
        assert_eq!(requests[1].header("Authorization"), Some("tok_auth"));
        assert_eq!(requests[1].json()["bucketName"], "releases");
    }

    #[test]
    fn connect_unknown_bucket_fails() {
        let server = MockServer::new();
        let url = server.url();
        let handle = server.serve(vec![
            (200, auth_body(&url)),
            (200, r#"{"buckets":[]}"#.to_string()),
        ]);

        let result = B2Store::connect(&url, "key_id", "app_key", "releases");
        handle.join().unwrap();

        assert!(matches!(result, Err(StoreError::Destination(_))));
    }

    #[test]
    fn bad_credentials_map_to_auth_error() {
        let server = MockServer::new();
        let url = server.url();
        let handle = server.serve(vec![(
            401,
            r#"{"status":401,"code":"unauthorized","message":"invalid key"}"#.to_string(),
        )]);

        let result = B2Store::connect(&url, "key_id", "bad_key", "releases");
        handle.join().unwrap();

        match result {
            Err(StoreError::Auth(message)) => assert!(message.contains("invalid key")),
            other => panic!("expected auth error, got {:?}", other.err()),
        }
    }

    #[test]
    fn list_follows_pagination_and_reads_file_info() {
        let server = MockServer::new();
        let url = server.url();
        let mut responses = connect_responses(&url);
        responses.push((
            200,
            r#"{"files":[
                {"fileName":"v1/linux-x64/app","fileId":"id1","contentLength":10,
                 "uploadTimestamp":1722470400000,"fileInfo":{"sha256":"aa11"}}
               ],"nextFileName":"v1/macos-arm64/app"}"#
                .to_string(),
        ));
        responses.push((
            200,
            r#"{"files":[
                {"fileName":"v1/macos-arm64/app","fileId":"id2","contentLength":20,
                 "uploadTimestamp":1722470401000,"fileInfo":{}}
               ],"nextFileName":null}"#
                .to_string(),
        ));
        let handle = server.serve(responses);

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        let objects = store.list("v1").unwrap();
        let requests = handle.join().unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "v1/linux-x64/app");
        assert_eq!(objects[0].sha256.as_deref(), Some("aa11"));
        assert!(objects[0].modified_at.is_some());
        assert_eq!(objects[1].sha256, None);

        // Page one asks for the prefix; page two continues from the cursor
        assert_eq!(requests[2].json()["prefix"], "v1/");
        assert_eq!(requests[3].json()["startFileName"], "v1/macos-arm64/app");
    }

    #[test]
    fn put_uploads_with_encoded_name_and_digest_info() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("app");
        std::fs::write(&file, b"payload").unwrap();

        let server = MockServer::new();
        let url = server.url();
        let mut responses = connect_responses(&url);
        responses.push((
            200,
            format!(r#"{{"uploadUrl":"{url}/upload/bkt1","authorizationToken":"tok_upload"}}"#),
        ));
        responses.push((
            200,
            r#"{"fileId":"id9","fileName":"v1/linux x64/app","contentLength":7}"#.to_string(),
        ));
        let handle = server.serve(responses);

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        store.put("v1/linux x64/app", &file, "cafe01").unwrap();
        let requests = handle.join().unwrap();

        let upload = &requests[3];
        assert_eq!(upload.path, "/upload/bkt1");
        assert_eq!(upload.header("Authorization"), Some("tok_upload"));
        assert_eq!(upload.header("X-Bz-File-Name"), Some("v1/linux%20x64/app"));
        assert_eq!(upload.header("X-Bz-Content-Sha1"), Some("do_not_verify"));
        assert_eq!(upload.header("X-Bz-Info-sha256"), Some("cafe01"));
        assert_eq!(upload.body, "payload");
    }

    #[test]
    fn upload_server_error_is_transient() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("app");
        std::fs::write(&file, b"payload").unwrap();

        let server = MockServer::new();
        let url = server.url();
        let mut responses = connect_responses(&url);
        responses.push((
            503,
            r#"{"status":503,"code":"service_unavailable","message":"try again"}"#.to_string(),
        ));
        let handle = server.serve(responses);

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        let result = store.put("v1/app", &file, "cafe01");
        handle.join().unwrap();

        let err = result.unwrap_err();
        assert!(err.is_transient(), "503 must be transient: {err}");
    }

    #[test]
    fn delete_missing_object_is_ok() {
        let server = MockServer::new();
        let url = server.url();
        let mut responses = connect_responses(&url);
        // resolve_file_id listing finds nothing
        responses.push((200, r#"{"files":[],"nextFileName":null}"#.to_string()));
        let handle = server.serve(responses);

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        store.delete("v1/ghost").unwrap();
        let requests = handle.join().unwrap();

        assert_eq!(requests.len(), 3, "no delete call for an absent object");
    }

    #[test]
    fn delete_uses_cached_file_id_from_listing() {
        let server = MockServer::new();
        let url = server.url();
        let mut responses = connect_responses(&url);
        responses.push((
            200,
            r#"{"files":[
                {"fileName":"v1/app","fileId":"id7","contentLength":5,
                 "uploadTimestamp":1722470400000,"fileInfo":{}}
               ],"nextFileName":null}"#
                .to_string(),
        ));
        responses.push((
            200,
            r#"{"fileId":"id7","fileName":"v1/app"}"#.to_string(),
        ));
        let handle = server.serve(responses);

        let store = B2Store::connect(&url, "key_id", "app_key", "releases").unwrap();
        store.list("v1").unwrap();
        store.delete("v1/app").unwrap();
        let requests = handle.join().unwrap();

        let delete = &requests[3];
        assert_eq!(delete.path, "/b2api/v2/b2_delete_file_version");
        assert_eq!(delete.json()["fileId"], "id7");
        assert_eq!(delete.json()["fileName"], "v1/app");
    }

    #[test]
    fn garbage_response_is_protocol_error() {
        let server = MockServer::new();
        let url = server.url();
        let handle = server.serve(vec![(200, "not json at all".to_string())]);

        let result = B2Store::connect(&url, "key_id", "app_key", "releases");
        handle.join().unwrap();

        assert!(matches!(result, Err(StoreError::Protocol(_))));
    }

    #[test]
    fn connection_refused_is_transient_network_error() {
        let result = B2Store::connect("http://127.0.0.1:1", "key_id", "app_key", "releases");
        match result {
            Err(e) => assert!(e.is_transient(), "refused connection must be transient"),
            Ok(_) => panic!("connect to a dead port cannot succeed"),
        }
    }

    #[test]
    fn encode_file_name_preserves_separators() {
        assert_eq!(encode_file_name("a/b/c.bin"), "a/b/c.bin");
        assert_eq!(encode_file_name("v 1/ap p"), "v%201/ap%20p");
        assert_eq!(encode_file_name("naïve"), "na%C3%AFve");
    }
}
