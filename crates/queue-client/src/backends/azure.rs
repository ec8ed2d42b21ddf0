//! Azure Storage Queue backend speaking the REST API directly.
//!
//! This backend talks to the Queue service over HTTP instead of going
//! through a vendor SDK. That keeps the dependency surface small and makes
//! the request/response handling transparent and testable: connection-string
//! parsing, Shared Key signing, and XML parsing are all plain functions
//! exercised by unit tests without a live account.
//!
//! ## Authentication
//!
//! Shared Key authorization only: every request carries an
//! `Authorization: SharedKey account:signature` header where the signature
//! is an HMAC-SHA256 over the canonical string-to-sign. SAS/token-based
//! credentials are an unimplemented extension point.
//!
//! ## Wire format
//!
//! Message text is base64-encoded inside the XML body, matching the classic
//! client libraries, so payloads interoperate with messages produced by
//! those libraries.

use crate::backend::QueueBackend;
use crate::error::{ConfigurationError, QueueError};
use crate::message::{Message, MessageId, PopReceipt, QueueName, Timestamp};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client as HttpClient, Method, StatusCode};
use sha2::Sha256;
use std::collections::HashSet;
use tokio::sync::RwLock;
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

/// Queue service REST API version sent with every request
const API_VERSION: &str = "2018-03-28";

/// Visibility timeout ceiling accepted by the service (7 days, in seconds)
const MAX_VISIBILITY_SECS: i64 = 604_800;

/// Well-known development-storage account used by Azurite and the legacy
/// storage emulator
const DEV_STORE_ACCOUNT: &str = "devstoreaccount1";
const DEV_STORE_KEY: &str = "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_STORE_QUEUE_ENDPOINT: &str = "http://127.0.0.1:10001/devstoreaccount1";

// ============================================================================
// Configuration
// ============================================================================

/// Parsed Azure Storage connection settings for the queue service
#[derive(Debug, Clone)]
pub struct AzureQueueConfig {
    /// Storage account name
    pub account: String,
    /// Decoded account key
    pub key: Vec<u8>,
    /// Queue service endpoint, e.g. `https://{account}.queue.core.windows.net`
    pub endpoint: Url,
}

impl AzureQueueConfig {
    /// Parse a storage connection string.
    ///
    /// Recognized fields: `AccountName`, `AccountKey`, `QueueEndpoint`,
    /// `EndpointSuffix` (default `core.windows.net`),
    /// `DefaultEndpointsProtocol` (default `https`), and
    /// `UseDevelopmentStorage=true` as a shorthand for the Azurite account.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConfigurationError> {
        let mut account = None;
        let mut key = None;
        let mut queue_endpoint = None;
        let mut endpoint_suffix = "core.windows.net".to_string();
        let mut protocol = "https".to_string();
        let mut use_dev_storage = false;

        for pair in connection_string.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (name, value) = pair.split_once('=').ok_or_else(|| {
                ConfigurationError::Invalid {
                    message: format!("malformed connection string segment: {}", pair),
                }
            })?;

            match name {
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => key = Some(value.to_string()),
                "QueueEndpoint" => queue_endpoint = Some(value.to_string()),
                "EndpointSuffix" => endpoint_suffix = value.to_string(),
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "UseDevelopmentStorage" => use_dev_storage = value.eq_ignore_ascii_case("true"),
                // Blob/table/file endpoints and SAS fields are not used here
                _ => {}
            }
        }

        if use_dev_storage {
            account = account.or_else(|| Some(DEV_STORE_ACCOUNT.to_string()));
            key = key.or_else(|| Some(DEV_STORE_KEY.to_string()));
            queue_endpoint = queue_endpoint.or_else(|| Some(DEV_STORE_QUEUE_ENDPOINT.to_string()));
        }

        let account = account.ok_or_else(|| ConfigurationError::Missing {
            key: "AccountName".to_string(),
        })?;
        let key = key.ok_or_else(|| ConfigurationError::Missing {
            key: "AccountKey".to_string(),
        })?;

        let key = BASE64
            .decode(key.as_bytes())
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("AccountKey is not valid base64: {}", e),
            })?;

        let endpoint = queue_endpoint
            .unwrap_or_else(|| format!("{}://{}.queue.{}", protocol, account, endpoint_suffix));
        let endpoint = Url::parse(&endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("invalid queue endpoint: {}", e),
        })?;

        Ok(Self {
            account,
            key,
            endpoint,
        })
    }
}

// ============================================================================
// Shared Key Signing
// ============================================================================

/// Shared Key signer for storage service requests.
///
/// Builds the canonical string-to-sign (verb, standard headers,
/// canonicalized `x-ms-*` headers, canonicalized resource) and signs it with
/// HMAC-SHA256 over the decoded account key.
#[derive(Clone)]
struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
}

impl SharedKeySigner {
    fn new(account: String, key: Vec<u8>) -> Self {
        Self { account, key }
    }

    /// Build the `Authorization` header value for a request.
    ///
    /// `query` carries the raw (unencoded) query parameters; the
    /// canonicalized resource wants them decoded, lowercase-named, and
    /// sorted.
    fn authorization(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        x_ms_date: &str,
        content_length: usize,
        content_type: &str,
    ) -> String {
        let string_to_sign = self.string_to_sign(
            method,
            path,
            query,
            x_ms_date,
            content_length,
            content_type,
        );

        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        format!("SharedKey {}:{}", self.account, signature)
    }

    fn string_to_sign(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        x_ms_date: &str,
        content_length: usize,
        content_type: &str,
    ) -> String {
        // Content-Length is signed as the empty string when there is no body
        let content_length = if content_length == 0 {
            String::new()
        } else {
            content_length.to_string()
        };

        // Canonicalized x-ms-* headers, lowercase and sorted. Only the two
        // fixed headers below are ever sent.
        let canonical_headers = format!(
            "x-ms-date:{}\nx-ms-version:{}\n",
            x_ms_date, API_VERSION
        );

        let canonical_resource = self.canonical_resource(path, query);

        // VERB, Content-Encoding, Content-Language, Content-Length,
        // Content-MD5, Content-Type, Date, If-Modified-Since, If-Match,
        // If-None-Match, If-Unmodified-Since, Range, then headers + resource
        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
            method.as_str(),
            content_length,
            content_type,
            canonical_headers,
            canonical_resource
        )
    }

    fn canonical_resource(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut resource = format!("/{}{}", self.account, path);

        let mut params: Vec<(String, &str)> = query
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();
        params.sort();

        for (name, value) in params {
            resource.push_str(&format!("\n{}:{}", name, value));
        }

        resource
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Azure Storage Queue backend
pub struct AzureQueueBackend {
    http_client: HttpClient,
    config: AzureQueueConfig,
    signer: SharedKeySigner,
    // Queues already confirmed to exist; only the first operation per queue
    // pays the create-if-absent round trip
    ensured: RwLock<HashSet<QueueName>>,
}

impl AzureQueueBackend {
    /// Create a backend from a storage connection string.
    ///
    /// Parsing is local; no network call is made until the first operation.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, QueueError> {
        let config = AzureQueueConfig::from_connection_string(connection_string)?;
        Self::new(config)
    }

    /// Create a backend from parsed configuration
    pub fn new(config: AzureQueueConfig) -> Result<Self, QueueError> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let signer = SharedKeySigner::new(config.account.clone(), config.key.clone());

        Ok(Self {
            http_client,
            config,
            signer,
            ensured: RwLock::new(HashSet::new()),
        })
    }

    /// Issue one signed request and return the status and response body.
    ///
    /// Transport failures map to `ConnectionFailed`; HTTP error responses
    /// map to the error taxonomy via [`parse_error_response`], with
    /// operation-specific codes refined at the call sites.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> Result<(StatusCode, String), QueueError> {
        let x_ms_date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let (content_length, content_type) = match &body {
            Some(b) => (b.len(), "application/xml"),
            None => (0, ""),
        };

        let authorization = self.signer.authorization(
            &method,
            &full_path(&self.config.endpoint, path),
            query,
            &x_ms_date,
            content_length,
            content_type,
        );

        let mut url = self.config.endpoint.clone();
        {
            let base_path = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}{}", base_path, path));
        }
        for (name, value) in query {
            url.query_pairs_mut().append_pair(name, value);
        }

        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", authorization)
            .header("x-ms-date", x_ms_date)
            .header("x-ms-version", API_VERSION);

        if let Some(b) = body {
            request = request.header("Content-Type", content_type).body(b);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QueueError::ConnectionFailed {
                    message: format!("request timeout: {}", e),
                }
            } else if e.is_connect() {
                QueueError::ConnectionFailed {
                    message: format!("connection failed: {}", e),
                }
            } else {
                QueueError::ConnectionFailed {
                    message: format!("HTTP request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("failed to read response body: {}", e),
            })?;

        if status.is_success() {
            Ok((status, response_body))
        } else {
            Err(parse_error_response(status, &response_body))
        }
    }
}

/// Path of a request relative to the account, including any path prefix the
/// endpoint itself carries (development storage endpoints embed the account
/// name in the path).
fn full_path(endpoint: &Url, path: &str) -> String {
    let base = endpoint.path().trim_end_matches('/');
    format!("{}{}", base, path)
}

#[async_trait]
impl QueueBackend for AzureQueueBackend {
    async fn ensure_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        {
            let ensured = self.ensured.read().await;
            if ensured.contains(queue) {
                return Ok(());
            }
        }

        let path = format!("/{}", queue.as_str());
        let result = self.request(Method::PUT, &path, &[], None).await;

        match result {
            // 201 created, 204 already exists with matching metadata
            Ok(_) => {}
            // 409 QueueAlreadyExists still means the queue is there
            Err(QueueError::ServiceError { code, .. }) if code == "QueueAlreadyExists" => {}
            Err(e) => return Err(e),
        }

        let mut ensured = self.ensured.write().await;
        ensured.insert(queue.clone());

        Ok(())
    }

    async fn put_message(
        &self,
        queue: &QueueName,
        payload: &str,
    ) -> Result<MessageId, QueueError> {
        let path = format!("/{}/messages", queue.as_str());
        let body = format!(
            "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
            BASE64.encode(payload.as_bytes())
        );

        let (_, response_body) = self
            .request(Method::POST, &path, &[], Some(body))
            .await
            .map_err(|e| not_found_to_queue(e, queue))?;

        let id = parse_messages_list(&response_body)?
            .pop()
            .and_then(|raw| raw.message_id)
            .ok_or_else(|| QueueError::ServiceError {
                status: 201,
                code: "MalformedResponse".to_string(),
                message: "put-message response carried no MessageId".to_string(),
            })?;

        Ok(MessageId::new(id))
    }

    async fn get_messages(
        &self,
        queue: &QueueName,
        count: u32,
        visibility: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let path = format!("/{}/messages", queue.as_str());
        let visibility_secs = visibility.num_seconds().clamp(1, MAX_VISIBILITY_SECS);
        let query = [
            ("numofmessages", count.to_string()),
            ("visibilitytimeout", visibility_secs.to_string()),
        ];

        let (_, response_body) = self
            .request(Method::GET, &path, &query, None)
            .await
            .map_err(|e| not_found_to_queue(e, queue))?;

        parse_messages_list(&response_body)?
            .into_iter()
            .map(RawQueueMessage::into_message)
            .collect()
    }

    async fn peek_message(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        let path = format!("/{}/messages", queue.as_str());
        let query = [
            ("numofmessages", "1".to_string()),
            ("peekonly", "true".to_string()),
        ];

        let (_, response_body) = self
            .request(Method::GET, &path, &query, None)
            .await
            .map_err(|e| not_found_to_queue(e, queue))?;

        let mut messages = parse_messages_list(&response_body)?;
        match messages.pop() {
            Some(raw) => Ok(Some(raw.into_message()?)),
            None => Ok(None),
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueName,
        id: &MessageId,
        receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        let path = format!("/{}/messages/{}", queue.as_str(), id.as_str());
        let query = [("popreceipt", receipt.as_str().to_string())];

        let result = self.request(Method::DELETE, &path, &query, None).await;

        match result {
            Ok(_) => Ok(()),
            Err(QueueError::ServiceError { code, .. })
                if code == "MessageNotFound" || code == "PopReceiptMismatch" =>
            {
                Err(QueueError::MessageNotFound {
                    receipt: receipt.as_str().to_string(),
                })
            }
            Err(e) => Err(not_found_to_queue(e, queue)),
        }
    }
}

/// Refine a generic service error into `QueueNotFound` for the given queue
fn not_found_to_queue(error: QueueError, queue: &QueueName) -> QueueError {
    match error {
        QueueError::ServiceError { code, .. } if code == "QueueNotFound" => {
            QueueError::QueueNotFound {
                queue_name: queue.as_str().to_string(),
            }
        }
        other => other,
    }
}

// ============================================================================
// XML Parsing
// ============================================================================

/// Fields of one `<QueueMessage>` element; everything optional because put
/// and peek responses carry different subsets
#[derive(Debug, Default, PartialEq)]
struct RawQueueMessage {
    message_id: Option<String>,
    message_text: Option<String>,
    pop_receipt: Option<String>,
    insertion_time: Option<String>,
    expiration_time: Option<String>,
    time_next_visible: Option<String>,
    dequeue_count: Option<String>,
}

impl RawQueueMessage {
    fn into_message(self) -> Result<Message, QueueError> {
        let id = self.message_id.ok_or_else(|| QueueError::ServiceError {
            status: 200,
            code: "MalformedResponse".to_string(),
            message: "QueueMessage element without MessageId".to_string(),
        })?;

        let payload = decode_message_text(self.message_text.as_deref().unwrap_or_default());

        Ok(Message {
            payload,
            id: MessageId::new(id),
            pop_receipt: self.pop_receipt.map(PopReceipt::new),
            inserted_at: self.insertion_time.as_deref().and_then(parse_rfc1123),
            expires_at: self.expiration_time.as_deref().and_then(parse_rfc1123),
            next_visible_at: self.time_next_visible.as_deref().and_then(parse_rfc1123),
            dequeue_count: self
                .dequeue_count
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// Message text travels base64-encoded; messages written by other tooling
/// may carry raw text, which is passed through unchanged.
fn decode_message_text(text: &str) -> String {
    match BASE64.decode(text.as_bytes()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

/// Parse an RFC 1123 timestamp ("Fri, 09 Oct 2009 21:04:30 GMT")
fn parse_rfc1123(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
}

/// Parse a `<QueueMessagesList>` response document
fn parse_messages_list(xml: &str) -> Result<Vec<RawQueueMessage>, QueueError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut current: Option<RawQueueMessage> = None;
    let mut current_element = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "QueueMessage" {
                    current = Some(RawQueueMessage::default());
                }
                current_element = name;
            }
            Ok(Event::Text(e)) => {
                if let Some(ref mut message) = current {
                    let text = e
                        .unescape()
                        .map_err(|e| malformed_xml(&e.to_string()))?
                        .to_string();
                    match current_element.as_str() {
                        "MessageId" => message.message_id = Some(text),
                        "MessageText" => message.message_text = Some(text),
                        "PopReceipt" => message.pop_receipt = Some(text),
                        "InsertionTime" => message.insertion_time = Some(text),
                        "ExpirationTime" => message.expiration_time = Some(text),
                        "TimeNextVisible" => message.time_next_visible = Some(text),
                        "DequeueCount" => message.dequeue_count = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"QueueMessage" {
                    if let Some(message) = current.take() {
                        messages.push(message);
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed_xml(&e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Parse a storage service `<Error>` document into the error taxonomy
fn parse_error_response(status: StatusCode, xml: &str) -> QueueError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut code = String::new();
    let mut message = String::new();
    let mut current_element = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_element = String::from_utf8_lossy(e.name().as_ref()).to_string();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_element.as_str() {
                    "Code" => code = text,
                    "Message" => message = text,
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if code.is_empty() {
        code = status
            .canonical_reason()
            .unwrap_or("UnknownError")
            .replace(' ', "");
    }

    if status == StatusCode::FORBIDDEN || code == "AuthenticationFailed" {
        return QueueError::AuthenticationFailed { message };
    }

    QueueError::ServiceError {
        status: status.as_u16(),
        code,
        message,
    }
}

fn malformed_xml(detail: &str) -> QueueError {
    QueueError::ServiceError {
        status: 200,
        code: "MalformedResponse".to_string(),
        message: format!("failed to parse XML response: {}", detail),
    }
}
