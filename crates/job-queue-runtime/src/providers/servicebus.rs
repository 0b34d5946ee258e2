//! Managed service bus provider over the HTTP REST interface.
//!
//! This module talks to a service bus namespace with plain HTTPS calls:
//! - Shared access signature (SAS) authentication derived from a connection string
//! - Peek-lock receive with the `BrokerProperties` and `Location` response headers
//! - Complete, abandon and lock renewal addressed through the message `Location`
//! - Queue administration through the Atom `QueueDescription` documents
//!
//! ## Limitations
//!
//! The REST interface exposes neither dead-lettering of a locked message nor
//! non-consuming peek. Both return [`QueueError::Unsupported`].
//!
//! ## Example
//!
//! ```no_run
//! use job_queue_runtime::providers::servicebus::ServiceBusProvider;
//! use job_queue_runtime::ServiceBusConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ServiceBusProvider::new(ServiceBusConfig {
//!     connection_string: "Endpoint=sb://example.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0".to_string(),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::client::{MessageReceiver, QueueAdministrator, QueueHandle, QueueProvider};
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    LockToken, Message, MessageId, PeekedMessage, QueueName, ReceiptHandle, ReceivedMessage,
    Timestamp,
};
use crate::provider::{ProviderType, QueueDescription, QueueRuntimeInfo, ServiceBusConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, AUTHORIZATION, LOCATION};
use reqwest::{Client as HttpClient, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

#[cfg(test)]
#[path = "servicebus_tests.rs"]
mod tests;

const BROKER_PROPERTIES: &str = "BrokerProperties";
const ADMIN_API_VERSION: &str = "2017-04";
const ATOM_ENTRY_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Error Types
// ============================================================================

/// Service bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceBusError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message lock lost: {0}")]
    LockLost(String),

    #[error("Service error ({status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceBusError {
    /// Map service bus error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::PermissionDenied(operation) => QueueError::PermissionDenied { operation },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::Timeout(duration) => QueueError::Timeout { duration },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::LockLost(lock_token) => QueueError::MessageLockLost { lock_token },
            Self::ServiceError { status, message } => QueueError::ProviderError {
                provider: ProviderType::ServiceBus.to_string(),
                code: status.to_string(),
                message,
            },
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::InvalidResponse(message) => {
                QueueError::SerializationError(SerializationError::InvalidDocument { message })
            }
        }
    }
}

impl From<ServiceBusError> for QueueError {
    fn from(error: ServiceBusError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// Connection String and SAS Signing
// ============================================================================

/// Parsed `Endpoint=…;SharedAccessKeyName=…;SharedAccessKey=…` connection string
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// HTTPS endpoint of the namespace, always ending in `/`
    pub endpoint: Url,
    pub key_name: String,
    key: String,
}

impl ConnectionString {
    /// Parse a connection string. `sb://` endpoints are mapped to `https://`.
    pub fn parse(connection_string: &str) -> Result<Self, ServiceBusError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;

        for part in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
            let (name, value) = part.trim().split_once('=').ok_or_else(|| {
                ServiceBusError::ConfigurationError(format!(
                    "Malformed connection string segment: {}",
                    part
                ))
            })?;

            match name {
                "Endpoint" => endpoint = Some(value.to_string()),
                "SharedAccessKeyName" => key_name = Some(value.to_string()),
                "SharedAccessKey" => key = Some(value.to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| missing("Endpoint"))?;
        let key_name = key_name.ok_or_else(|| missing("SharedAccessKeyName"))?;
        let key = key.ok_or_else(|| missing("SharedAccessKey"))?;

        let endpoint = match endpoint.strip_prefix("sb://") {
            Some(rest) => format!("https://{}", rest),
            None => endpoint,
        };
        let endpoint = if endpoint.ends_with('/') {
            endpoint
        } else {
            format!("{}/", endpoint)
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ServiceBusError::ConfigurationError(format!("Invalid endpoint: {}", e))
        })?;

        Ok(Self {
            endpoint,
            key_name,
            key,
        })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("key_name", &self.key_name)
            .field("key", &"<REDACTED>")
            .finish()
    }
}

fn missing(key: &str) -> ServiceBusError {
    ServiceBusError::ConfigurationError(format!("Connection string is missing {}", key))
}

type HmacSha256 = Hmac<Sha256>;

/// Shared access signature token generator
///
/// The token signs `urlencode(resource_uri) + "\n" + expiry` with HMAC-SHA256
/// using the shared access key, and is sent as the `Authorization` header:
///
/// `SharedAccessSignature sr={resource}&sig={signature}&se={expiry}&skn={key name}`
#[derive(Clone)]
struct SasTokenProvider {
    resource_uri: String,
    key_name: String,
    key: String,
    ttl: Duration,
}

impl SasTokenProvider {
    fn new(connection: &ConnectionString, ttl: Duration) -> Self {
        Self {
            resource_uri: connection.endpoint.as_str().to_lowercase(),
            key_name: connection.key_name.clone(),
            key: connection.key.clone(),
            ttl,
        }
    }

    /// Create a token valid until `now + ttl`
    fn token(&self, now: DateTime<Utc>) -> Result<String, ServiceBusError> {
        let expiry = now.timestamp() + self.ttl.as_secs() as i64;
        let encoded_resource = urlencoding::encode(&self.resource_uri);
        let string_to_sign = format!("{}\n{}", encoded_resource, expiry);

        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes()).map_err(|e| {
            ServiceBusError::ConfigurationError(format!("Invalid shared access key: {}", e))
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_resource,
            urlencoding::encode(&signature),
            expiry,
            self.key_name
        ))
    }
}

// ============================================================================
// Broker Properties
// ============================================================================

/// The `BrokerProperties` JSON header carried on sends and receives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    /// RFC 2822 date, e.g. `Mon, 05 Aug 2024 10:00:00 GMT`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueued_time_utc: Option<String>,
}

impl BrokerProperties {
    /// Read the header from a response, if present
    fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, SerializationError> {
        let Some(value) = headers.get(BROKER_PROPERTIES) else {
            return Ok(None);
        };
        let text = value
            .to_str()
            .map_err(|e| SerializationError::InvalidHeader {
                header: BROKER_PROPERTIES.to_string(),
                message: e.to_string(),
            })?;
        let properties = serde_json::from_str(text)?;
        Ok(Some(properties))
    }

    /// Lock expiry, if present
    pub fn locked_until(&self) -> Result<Option<Timestamp>, SerializationError> {
        self.locked_until_utc
            .as_deref()
            .map(|value| parse_http_date("LockedUntilUtc", value))
            .transpose()
    }

    /// Enqueue time, if present
    pub fn enqueued_at(&self) -> Result<Option<Timestamp>, SerializationError> {
        self.enqueued_time_utc
            .as_deref()
            .map(|value| parse_http_date("EnqueuedTimeUtc", value))
            .transpose()
    }
}

fn parse_http_date(field: &str, value: &str) -> Result<Timestamp, SerializationError> {
    DateTime::parse_from_rfc2822(value)
        .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
        .map_err(|e| SerializationError::InvalidHeader {
            header: format!("{}.{}", BROKER_PROPERTIES, field),
            message: e.to_string(),
        })
}

// ============================================================================
// Administration Documents
// ============================================================================

/// Atom entry creating a queue. Element order follows the service schema.
fn queue_description_document(description: &QueueDescription) -> String {
    let mut properties = format!(
        "<LockDuration>PT{}S</LockDuration>",
        description.lock_duration.as_secs()
    );
    if let Some(duplicate_detection) = description.requires_duplicate_detection {
        properties.push_str(&format!(
            "<RequiresDuplicateDetection>{}</RequiresDuplicateDetection>",
            duplicate_detection
        ));
    }
    properties.push_str(&format!(
        "<MaxDeliveryCount>{}</MaxDeliveryCount>",
        description.max_delivery_count
    ));

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<entry xmlns="http://www.w3.org/2005/Atom">"#,
            r#"<content type="application/xml">"#,
            r#"<QueueDescription xmlns:i="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect">"#,
            "{}",
            "</QueueDescription></content></entry>"
        ),
        properties
    )
}

/// Parsed view of the administration GET response
#[derive(Debug, Default, PartialEq, Eq)]
struct QueueEntry {
    exists: bool,
    info: QueueRuntimeInfo,
}

/// Parse an Atom response. A feed without an `<entry>` means the queue does not exist.
fn parse_queue_entry(xml: &str) -> Result<QueueEntry, ServiceBusError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    #[derive(Clone, Copy)]
    enum Counter {
        Active,
        DeadLetter,
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entry = QueueEntry::default();
    let mut current: Option<Counter> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => entry.exists = true,
                b"ActiveMessageCount" => current = Some(Counter::Active),
                b"DeadLetterMessageCount" => current = Some(Counter::DeadLetter),
                _ => current = None,
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"entry" => {
                entry.exists = true;
            }
            Ok(Event::Text(e)) => {
                if let Some(counter) = current.take() {
                    let text = e.unescape().map_err(|e| {
                        ServiceBusError::InvalidResponse(format!("Failed to parse XML: {}", e))
                    })?;
                    let value = text.trim().parse::<u64>().map_err(|e| {
                        ServiceBusError::InvalidResponse(format!(
                            "Invalid message count '{}': {}",
                            text, e
                        ))
                    })?;
                    match counter {
                        Counter::Active => entry.info.active_message_count = value,
                        Counter::DeadLetter => entry.info.dead_letter_message_count = value,
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ServiceBusError::InvalidResponse(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(entry)
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Shared HTTP plumbing used by handles, receivers and the administrator
struct ServiceBusClient {
    http_client: HttpClient,
    endpoint: Url,
    signer: SasTokenProvider,
    http_grace: Duration,
}

impl ServiceBusClient {
    fn url(&self, path: &str) -> Result<Url, ServiceBusError> {
        self.endpoint
            .join(path)
            .map_err(|e| ServiceBusError::ConfigurationError(format!("Invalid URL: {}", e)))
    }

    /// Send a signed request. `timeout` overrides the client-level timeout.
    async fn request(
        &self,
        method: Method,
        url: Url,
        headers: Vec<(&'static str, String)>,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Response, ServiceBusError> {
        let token = self.signer.token(Utc::now())?;

        let mut request = self
            .http_client
            .request(method, url)
            .header(AUTHORIZATION, token)
            .timeout(timeout);

        for (name, value) in headers {
            request = request.header(name, value);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceBusError::Timeout(timeout)
            } else if e.is_connect() {
                ServiceBusError::NetworkError(format!("Connection failed: {}", e))
            } else {
                ServiceBusError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })
    }

    /// Map a non-success response onto an error
    async fn error_from_response(response: Response, subject: &str) -> ServiceBusError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED => ServiceBusError::Authentication(body),
            StatusCode::FORBIDDEN => ServiceBusError::PermissionDenied(subject.to_string()),
            StatusCode::NOT_FOUND => ServiceBusError::QueueNotFound(subject.to_string()),
            _ => ServiceBusError::ServiceError {
                status: status.as_u16(),
                message: body,
            },
        }
    }

    /// Map a non-success response to a per-message operation
    async fn lock_error_from_response(response: Response, lock_token: &str) -> ServiceBusError {
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                ServiceBusError::LockLost(lock_token.to_string())
            }
            _ => Self::error_from_response(response, lock_token).await,
        }
    }

    fn message_url(receipt: &ReceiptHandle) -> Result<Url, ServiceBusError> {
        Url::parse(receipt.message_ref()).map_err(|e| {
            ServiceBusError::InvalidResponse(format!("Invalid message location: {}", e))
        })
    }
}

// ============================================================================
// ServiceBusProvider
// ============================================================================

/// Service bus provider using the REST interface
#[derive(Clone)]
pub struct ServiceBusProvider {
    client: Arc<ServiceBusClient>,
}

impl ServiceBusProvider {
    /// Create a provider from configuration
    pub fn new(config: ServiceBusConfig) -> Result<Self, QueueError> {
        let connection = ConnectionString::parse(&config.connection_string)?;

        let http_client = HttpClient::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ServiceBusError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        debug!(
            endpoint = %connection.endpoint,
            key_name = %connection.key_name,
            "Created service bus provider"
        );

        Ok(Self {
            client: Arc::new(ServiceBusClient {
                http_client,
                signer: SasTokenProvider::new(
                    &connection,
                    Duration::from_secs(config.token_ttl_seconds),
                ),
                endpoint: connection.endpoint,
                http_grace: Duration::from_secs(config.http_grace_seconds),
            }),
        })
    }
}

impl fmt::Debug for ServiceBusProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusProvider")
            .field("endpoint", &self.client.endpoint.as_str())
            .finish()
    }
}

#[async_trait]
impl QueueProvider for ServiceBusProvider {
    async fn open_queue(&self, queue: &QueueName) -> Result<Arc<dyn QueueHandle>, QueueError> {
        Ok(Arc::new(ServiceBusQueueHandle {
            client: Arc::clone(&self.client),
            queue_name: queue.clone(),
        }))
    }

    fn administrator(&self) -> Arc<dyn QueueAdministrator> {
        Arc::new(ServiceBusAdministrator {
            client: Arc::clone(&self.client),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::ServiceBus
    }
}

// ============================================================================
// Queue Handle
// ============================================================================

/// Handle bound to one service bus queue
pub struct ServiceBusQueueHandle {
    client: Arc<ServiceBusClient>,
    queue_name: QueueName,
}

#[async_trait]
impl QueueHandle for ServiceBusQueueHandle {
    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    #[instrument(skip(self, message), fields(queue = %self.queue_name, message_id = %message.message_id))]
    async fn send_message(&self, message: &Message) -> Result<MessageId, QueueError> {
        let max_size = ProviderType::ServiceBus.max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::ProviderError {
                provider: ProviderType::ServiceBus.to_string(),
                code: "MessageTooLarge".to_string(),
                message: format!("{} bytes exceeds {} bytes", message.body.len(), max_size),
            });
        }

        let properties = BrokerProperties {
            message_id: Some(message.message_id.as_str().to_string()),
            ..Default::default()
        };
        let properties = serde_json::to_string(&properties).map_err(SerializationError::from)?;

        let url = self
            .client
            .url(&format!("{}/messages", self.queue_name.as_str()))?;
        let response = self
            .client
            .request(
                Method::POST,
                url,
                vec![
                    (BROKER_PROPERTIES, properties),
                    ("Content-Type", ATOM_ENTRY_CONTENT_TYPE.to_string()),
                ],
                Some(message.body.to_vec()),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(
                ServiceBusClient::error_from_response(response, self.queue_name.as_str())
                    .await
                    .into(),
            );
        }

        debug!("Message sent");
        Ok(message.message_id.clone())
    }

    fn create_receiver(&self) -> Arc<dyn MessageReceiver> {
        Arc::new(ServiceBusReceiver {
            client: Arc::clone(&self.client),
            queue_name: self.queue_name.clone(),
        })
    }

    async fn peek_messages(&self, _max_messages: u32) -> Result<Vec<PeekedMessage>, QueueError> {
        Err(QueueError::Unsupported {
            provider: ProviderType::ServiceBus.to_string(),
            operation: "peek".to_string(),
        })
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// Peek-lock receiver over one service bus queue
pub struct ServiceBusReceiver {
    client: Arc<ServiceBusClient>,
    queue_name: QueueName,
}

impl ServiceBusReceiver {
    async fn parse_received(&self, response: Response) -> Result<ReceivedMessage, QueueError> {
        let headers = response.headers().clone();

        let properties = BrokerProperties::from_headers(&headers)?.ok_or_else(|| {
            SerializationError::InvalidHeader {
                header: BROKER_PROPERTIES.to_string(),
                message: "missing from peek-lock response".to_string(),
            }
        })?;

        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| SerializationError::InvalidHeader {
                header: LOCATION.to_string(),
                message: "missing from peek-lock response".to_string(),
            })?
            .to_string();

        let lock_token = properties.lock_token.clone().ok_or_else(|| {
            SerializationError::InvalidHeader {
                header: format!("{}.LockToken", BROKER_PROPERTIES),
                message: "missing".to_string(),
            }
        })?;

        let delivered_at = Timestamp::now();
        let locked_until = properties.locked_until()?.unwrap_or(delivered_at);
        let message_id = properties
            .message_id
            .clone()
            .and_then(|id| id.parse::<MessageId>().ok())
            .unwrap_or_default();

        let body = response.bytes().await.map_err(|e| QueueError::ConnectionFailed {
            message: format!("Failed to read message body: {}", e),
        })?;

        Ok(ReceivedMessage {
            message_id,
            body,
            receipt_handle: ReceiptHandle::new(
                LockToken::from_transport(lock_token),
                location,
                locked_until,
                ProviderType::ServiceBus,
            ),
            delivery_count: properties.delivery_count.unwrap_or(1),
            enqueued_at: properties.enqueued_at()?,
            delivered_at,
        })
    }
}

#[async_trait]
impl MessageReceiver for ServiceBusReceiver {
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut url = self
            .client
            .url(&format!("{}/messages/head", self.queue_name.as_str()))?;
        url.query_pairs_mut()
            .append_pair("timeout", &timeout.as_secs().to_string());

        let response = self
            .client
            .request(
                Method::POST,
                url,
                Vec::new(),
                None,
                timeout + self.client.http_grace,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let message = self.parse_received(response).await?;
                debug!(
                    message_id = %message.message_id,
                    delivery_count = message.delivery_count,
                    "Message locked"
                );
                Ok(Some(message))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(
                ServiceBusClient::error_from_response(response, self.queue_name.as_str())
                    .await
                    .into(),
            ),
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let url = ServiceBusClient::message_url(receipt)?;
        let response = self
            .client
            .request(Method::DELETE, url, Vec::new(), None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        if !response.status().is_success() {
            return Err(ServiceBusClient::lock_error_from_response(
                response,
                receipt.lock_token().as_str(),
            )
            .await
            .into());
        }
        Ok(())
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let url = ServiceBusClient::message_url(receipt)?;
        let response = self
            .client
            .request(Method::PUT, url, Vec::new(), None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        if !response.status().is_success() {
            return Err(ServiceBusClient::lock_error_from_response(
                response,
                receipt.lock_token().as_str(),
            )
            .await
            .into());
        }
        Ok(())
    }

    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        warn!(
            queue = %self.queue_name,
            lock_token = %receipt.lock_token(),
            reason = reason,
            "Dead-lettering is not available over REST"
        );
        Err(QueueError::Unsupported {
            provider: ProviderType::ServiceBus.to_string(),
            operation: "dead_letter".to_string(),
        })
    }

    async fn renew_message_lock(&self, receipt: &ReceiptHandle) -> Result<Timestamp, QueueError> {
        let url = ServiceBusClient::message_url(receipt)?;
        let response = self
            .client
            .request(Method::POST, url, Vec::new(), None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        if !response.status().is_success() {
            return Err(ServiceBusClient::lock_error_from_response(
                response,
                receipt.lock_token().as_str(),
            )
            .await
            .into());
        }

        // No reported expiry: keep the previous one.
        let renewed = BrokerProperties::from_headers(response.headers())?
            .map(|properties| properties.locked_until())
            .transpose()?
            .flatten();
        Ok(renewed.unwrap_or_else(|| receipt.locked_until()))
    }
}

// ============================================================================
// Administrator
// ============================================================================

/// Queue administration through the Atom management documents
pub struct ServiceBusAdministrator {
    client: Arc<ServiceBusClient>,
}

impl ServiceBusAdministrator {
    async fn get_entry(&self, queue: &QueueName) -> Result<QueueEntry, QueueError> {
        let mut url = self.client.url(queue.as_str())?;
        url.query_pairs_mut()
            .append_pair("api-version", ADMIN_API_VERSION);

        let response = self
            .client
            .request(Method::GET, url, Vec::new(), None, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(|e| QueueError::ConnectionFailed {
                    message: format!("Failed to read response body: {}", e),
                })?;
                Ok(parse_queue_entry(&body)?)
            }
            StatusCode::NOT_FOUND => Ok(QueueEntry::default()),
            _ => Err(
                ServiceBusClient::error_from_response(response, &format!("get queue {}", queue))
                    .await
                    .into(),
            ),
        }
    }
}

#[async_trait]
impl QueueAdministrator for ServiceBusAdministrator {
    async fn queue_exists(&self, queue: &QueueName) -> Result<bool, QueueError> {
        Ok(self.get_entry(queue).await?.exists)
    }

    #[instrument(skip(self, description), fields(queue = %description.name))]
    async fn create_queue(&self, description: &QueueDescription) -> Result<(), QueueError> {
        let url = self.client.url(description.name.as_str())?;
        let response = self
            .client
            .request(
                Method::PUT,
                url,
                vec![("Content-Type", ATOM_ENTRY_CONTENT_TYPE.to_string())],
                Some(queue_description_document(description).into_bytes()),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                debug!("Queue created");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!("Queue already exists");
                Ok(())
            }
            _ => Err(ServiceBusClient::error_from_response(
                response,
                &format!("create queue {}", description.name),
            )
            .await
            .into()),
        }
    }

    async fn runtime_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        let entry = self.get_entry(queue).await?;
        if !entry.exists {
            return Err(QueueError::QueueNotFound {
                queue_name: queue.as_str().to_string(),
            });
        }
        Ok(entry.info)
    }
}
