//! Google Drive v3 storage backend.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use crate::archive::auth::ServiceAccountAuth;
use crate::archive::backend::{DriveError, DriveItem, StorageBackend};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Bytes sent per upload request. Drive wants multiples of 256 KiB.
const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Give up when the server stops acknowledging new bytes this many times in a row.
const MAX_STALLED_CHUNKS: u32 = 3;

/// Viewer link for an uploaded file.
pub fn file_view_link(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view")
}

/// Link opening a folder in the Drive UI.
pub fn folder_link(folder_id: &str) -> String {
    format!("https://drive.google.com/drive/folders/{folder_id}")
}

/// Escape a value for use inside a single-quoted Drive query string.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent: Option<&str>) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
        escape_query_value(name),
        FOLDER_MIME,
        escape_query_value(parent.unwrap_or("root")),
    )
}

/// Guess a MIME type from the file extension.
fn mime_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn content_range(offset: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

/// Bytes the server has committed, from a `Range: bytes=0-N` header.
/// No header means nothing was received yet.
fn committed_bytes(range: Option<&str>) -> Option<u64> {
    let Some(range) = range else {
        return Some(0);
    };
    let (_, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse::<u64>().ok().map(|end| end + 1)
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CreatedItem {
    id: String,
}

/// Base URLs of the metadata and upload APIs.
#[derive(Debug, Clone)]
pub struct DriveEndpoints {
    pub files_url: String,
    pub upload_url: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            files_url: FILES_URL.to_string(),
            upload_url: UPLOAD_URL.to_string(),
        }
    }
}

/// Drive client authorized as a service account.
pub struct DriveClient {
    http: reqwest::Client,
    auth: ServiceAccountAuth,
    endpoints: DriveEndpoints,
    chunk_size: u64,
}

impl DriveClient {
    pub fn new(auth: ServiceAccountAuth) -> Self {
        Self::with_endpoints(auth, DriveEndpoints::default())
    }

    pub fn with_endpoints(auth: ServiceAccountAuth, endpoints: DriveEndpoints) -> Self {
        // Drive answers 308 for incomplete resumable uploads; never follow it.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to build HTTP client");

        Self { http, auth, endpoints, chunk_size: CHUNK_SIZE }
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    async fn token(&self) -> Result<String, DriveError> {
        self.auth.access_token().await
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, DriveError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DriveError::Http(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(DriveError::Api { status: status.as_u16(), body });
        }

        serde_json::from_str(&body).map_err(|e| DriveError::Parse(format!("{e}: {body}")))
    }

    async fn start_upload_session(
        &self,
        name: &str,
        folder_id: &str,
        mime: &str,
        total: u64,
    ) -> Result<String, DriveError> {
        let response = self
            .http
            .post(&self.endpoints.upload_url)
            .bearer_auth(self.token().await?)
            .query(&[("uploadType", "resumable"), ("fields", "id"), ("supportsAllDrives", "true")])
            .header("X-Upload-Content-Type", mime)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&serde_json::json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await
            .map_err(|e| DriveError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status: status.as_u16(), body });
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DriveError::Parse("upload session has no Location header".into()))
    }
}

#[async_trait]
impl StorageBackend for DriveClient {
    async fn find_folders(&self, name: &str, parent: Option<&str>) -> Result<Vec<DriveItem>, DriveError> {
        let query = folder_query(name, parent);
        debug!("Drive query: {}", query);

        let response = self
            .http
            .get(&self.endpoints.files_url)
            .bearer_auth(self.token().await?)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|e| DriveError::Http(e.to_string()))?;

        let list: FileList = Self::parse_json(response).await?;
        Ok(list
            .files
            .into_iter()
            .map(|f| DriveItem { id: f.id, name: f.name })
            .collect())
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String, DriveError> {
        let mut metadata = serde_json::json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let response = self
            .http
            .post(&self.endpoints.files_url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| DriveError::Http(e.to_string()))?;

        let created: CreatedItem = Self::parse_json(response).await?;
        Ok(created.id)
    }

    async fn upload_file(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<String, DriveError> {
        let total = tokio::fs::metadata(local_path).await?.len();
        let mime = mime_for(name);
        let session = self.start_upload_session(name, folder_id, mime, total).await?;
        debug!("Upload session opened for {} ({} bytes, {})", name, total, mime);

        let mut file = tokio::fs::File::open(local_path).await?;
        let mut offset = 0u64;
        let mut stalled = 0u32;

        loop {
            let len = self.chunk_size.min(total - offset);
            let mut chunk = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut chunk).await?;

            let response = self
                .http
                .put(&session)
                .bearer_auth(self.token().await?)
                .header(CONTENT_RANGE, content_range(offset, len, total))
                .header(CONTENT_TYPE, mime)
                .body(chunk)
                .send()
                .await
                .map_err(|e| DriveError::Http(e.to_string()))?;

            if response.status() != StatusCode::PERMANENT_REDIRECT {
                let created: CreatedItem = Self::parse_json(response).await?;
                info!("☁️ Uploaded {} ({} bytes) as {}", name, total, created.id);
                return Ok(created.id);
            }

            let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
            let committed = committed_bytes(range)
                .ok_or_else(|| DriveError::Parse(format!("bad Range header: {range:?}")))?;

            if committed <= offset {
                stalled += 1;
                if stalled >= MAX_STALLED_CHUNKS {
                    return Err(DriveError::Api {
                        status: StatusCode::PERMANENT_REDIRECT.as_u16(),
                        body: format!("upload of {name} stalled at byte {committed}"),
                    });
                }
            } else {
                stalled = 0;
            }
            offset = committed.min(total);
        }
    }

    async fn share_publicly(&self, item_id: &str) -> Result<(), DriveError> {
        let response = self
            .http
            .post(format!("{}/{item_id}/permissions", self.endpoints.files_url))
            .bearer_auth(self.token().await?)
            .query(&[("supportsAllDrives", "true")])
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await
            .map_err(|e| DriveError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{mount_token_endpoint, service_account_auth};
    use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> DriveClient {
        mount_token_endpoint(server, "tok-1", 1).await;
        let auth = service_account_auth(&format!("{}/token", server.uri()));
        let endpoints = DriveEndpoints {
            files_url: format!("{}/files", server.uri()),
            upload_url: format!("{}/upload", server.uri()),
        };
        DriveClient::with_endpoints(auth, endpoints).with_chunk_size(4)
    }

    async fn mount_session(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(query_param("uploadType", "resumable"))
            .and(header("x-upload-content-length", "10"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Location", format!("{}/session", server.uri())),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_chunk(server: &MockServer, range: &str, body: &[u8], response: ResponseTemplate, times: u64) {
        Mock::given(method("PUT"))
            .and(path("/session"))
            .and(header("content-range", range))
            .and(body_bytes(body.to_vec()))
            .respond_with(response)
            .expect(times)
            .mount(server)
            .await;
    }

    fn incomplete(committed: Option<&str>) -> ResponseTemplate {
        let response = ResponseTemplate::new(308);
        match committed {
            Some(range) => response.insert_header("Range", range),
            None => response,
        }
    }

    fn ten_byte_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"0123456789").unwrap();
        file
    }

    #[test]
    fn test_link_formats() {
        assert_eq!(file_view_link("abc"), "https://drive.google.com/file/d/abc/view");
        assert_eq!(folder_link("xyz"), "https://drive.google.com/drive/folders/xyz");
    }

    #[test]
    fn test_folder_query_with_parent() {
        assert_eq!(
            folder_query("ABC123", Some("parent1")),
            "name = 'ABC123' and mimeType = 'application/vnd.google-apps.folder' \
             and 'parent1' in parents and trashed = false"
        );
    }

    #[test]
    fn test_folder_query_defaults_to_root() {
        assert!(folder_query("ABC123", None).contains("'root' in parents"));
    }

    #[test]
    fn test_query_escaping() {
        assert_eq!(escape_query_value(r"it's"), r"it\'s");
        assert_eq!(escape_query_value(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("ABC123_0.jpg"), "image/jpeg");
        assert_eq!(mime_for("scan.JPEG"), "image/jpeg");
        assert_eq!(mime_for("ABC123.mp4"), "video/mp4");
        assert_eq!(mime_for("invoice.pdf"), "application/pdf");
        assert_eq!(mime_for("ABC123.dat"), "application/octet-stream");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(0, 10, 10), "bytes 0-9/10");
        assert_eq!(content_range(8, 2, 10), "bytes 8-9/10");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn test_committed_bytes() {
        assert_eq!(committed_bytes(None), Some(0));
        assert_eq!(committed_bytes(Some("bytes=0-8388607")), Some(8_388_608));
        assert_eq!(committed_bytes(Some("garbage")), None);
    }

    #[tokio::test]
    async fn test_upload_follows_acknowledged_ranges() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        mount_session(&server).await;
        mount_chunk(&server, "bytes 0-3/10", b"0123", incomplete(Some("bytes=0-3")), 1).await;
        mount_chunk(&server, "bytes 4-7/10", b"4567", incomplete(Some("bytes=0-7")), 1).await;
        let done = ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "file-9" }));
        mount_chunk(&server, "bytes 8-9/10", b"89", done, 1).await;

        let local = ten_byte_file();
        let id = drive.upload_file(local.path(), "ABC123_0.jpg", "folder-1").await.unwrap();

        assert_eq!(id, "file-9");
    }

    #[tokio::test]
    async fn test_upload_resends_from_partial_commit() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        mount_session(&server).await;
        // only two bytes of the first chunk landed
        mount_chunk(&server, "bytes 0-3/10", b"0123", incomplete(Some("bytes=0-1")), 1).await;
        mount_chunk(&server, "bytes 2-5/10", b"2345", incomplete(Some("bytes=0-5")), 1).await;
        let done = ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "file-7" }));
        mount_chunk(&server, "bytes 6-9/10", b"6789", done, 1).await;

        let local = ten_byte_file();
        let id = drive.upload_file(local.path(), "ABC123.mp4", "folder-1").await.unwrap();

        assert_eq!(id, "file-7");
    }

    #[tokio::test]
    async fn test_upload_gives_up_when_stalled() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        mount_session(&server).await;
        // 308 without Range: nothing committed, every time
        mount_chunk(&server, "bytes 0-3/10", b"0123", incomplete(None), MAX_STALLED_CHUNKS as u64).await;

        let local = ten_byte_file();
        let result = drive.upload_file(local.path(), "ABC123.mp4", "folder-1").await;

        match result {
            Err(DriveError::Api { status, body }) => {
                assert_eq!(status, 308);
                assert!(body.contains("stalled at byte 0"), "{body}");
            }
            other => panic!("expected stall error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_chunk_rejected() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        mount_session(&server).await;
        mount_chunk(&server, "bytes 0-3/10", b"0123", ResponseTemplate::new(500).set_body_string("oops"), 1).await;

        let local = ten_byte_file();
        let result = drive.upload_file(local.path(), "ABC123.mp4", "folder-1").await;

        assert!(matches!(result, Err(DriveError::Api { status: 500, .. })), "{result:?}");
    }

    #[tokio::test]
    async fn test_upload_session_without_location() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let local = ten_byte_file();
        let result = drive.upload_file(local.path(), "ABC123.mp4", "folder-1").await;

        assert!(matches!(result, Err(DriveError::Parse(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_find_folders_sends_query_and_bearer() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer tok-1"))
            .and(query_param("q", folder_query("ABC123", Some("orders-root")).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    { "id": "f1", "name": "ABC123" },
                    { "id": "f2", "name": "ABC123" }
                ]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let first = drive.find_folders("ABC123", Some("orders-root")).await.unwrap();
        // second call reuses the cached token (token endpoint expects one hit)
        let second = drive.find_folders("ABC123", Some("orders-root")).await.unwrap();

        let ids: Vec<&str> = first.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["f1", "f2"]);
        assert_eq!(first[0].name, "ABC123");
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_find_folders_empty_listing() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert!(drive.find_folders("ABC123", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_folders_error_status() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient permissions"))
            .mount(&server)
            .await;

        match drive.find_folders("ABC123", None).await {
            Err(DriveError::Api { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "insufficient permissions");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_folder_under_parent() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_json(serde_json::json!({
                "name": "ABC123",
                "mimeType": FOLDER_MIME,
                "parents": ["orders-root"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "new-folder" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = drive.create_folder("ABC123", Some("orders-root")).await.unwrap();

        assert_eq!(id, "new-folder");
    }

    #[tokio::test]
    async fn test_create_folder_in_root_omits_parents() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(body_json(serde_json::json!({ "name": "ABC123", "mimeType": FOLDER_MIME })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "root-child" })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(drive.create_folder("ABC123", None).await.unwrap(), "root-child");
    }

    #[tokio::test]
    async fn test_create_folder_unparseable_body() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = drive.create_folder("ABC123", None).await;

        assert!(matches!(result, Err(DriveError::Parse(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_share_publicly_grants_anyone_reader() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/files/file-9/permissions"))
            .and(body_json(serde_json::json!({ "role": "reader", "type": "anyone" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "anyoneWithLink" })))
            .expect(1)
            .mount(&server)
            .await;

        drive.share_publicly("file-9").await.unwrap();
    }

    #[tokio::test]
    async fn test_share_publicly_error_status() {
        let server = MockServer::start().await;
        let drive = client_for(&server).await;
        Mock::given(method("POST"))
            .and(path("/files/file-9/permissions"))
            .respond_with(ResponseTemplate::new(403).set_body_string("sharing disabled"))
            .mount(&server)
            .await;

        let result = drive.share_publicly("file-9").await;

        assert!(matches!(result, Err(DriveError::Api { status: 403, .. })), "{result:?}");
    }
}
