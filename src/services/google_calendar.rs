use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};
use crate::models::{DateRange, DestinationEvent, EventDraft, SyncTag};
use crate::services::store::{DeleteOutcome, EventStore};

const MAX_ATTEMPTS: usize = 3;
const CANCELLED_STATUS: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// OAuth Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_properties: Option<ExtendedProperties>,
}

/// Timed events carry `dateTime`; all-day events carry `date` only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    fn instant(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    #[serde(default)]
    pub overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedProperties {
    #[serde(default)]
    pub private: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
}

impl GoogleEvent {
    /// The managed view of this event, or `None` for anything the sync does
    /// not own: foreign, cancelled or all-day events.
    pub fn to_destination(&self) -> Option<DestinationEvent> {
        if self.status.as_deref() == Some(CANCELLED_STATUS) {
            return None;
        }
        let sync_tag = SyncTag::decode(&self.extended_properties.as_ref()?.private)?;

        Some(DestinationEvent {
            event_id: self.id.clone()?,
            sync_tag,
            start: self.start.as_ref()?.instant()?,
            end: self.end.as_ref()?.instant()?,
            title: self.summary.clone().unwrap_or_default(),
            description: self.description.clone(),
            location: self.location.clone(),
        })
    }
}

// ============================================================================
// Google Calendar client
// ============================================================================

/// Event store backed by one Google Calendar.
///
/// Authenticates with a long-lived refresh token; the short-lived access
/// token is cached and refreshed shortly before expiry or after a 401.
#[derive(Debug, Clone)]
pub struct GoogleCalendarService {
    client: Client,
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    calendar_id: String,
    color_id: String,
    reminder_minutes: u32,
    access_token: Arc<RwLock<Option<AccessToken>>>,
}

impl GoogleCalendarService {
    pub fn new(config: &GoogleConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            calendar_id: config.calendar_id.clone(),
            color_id: config.color_id.clone(),
            reminder_minutes: config.reminder_minutes,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    // ========================================================================
    // OAuth Methods
    // ========================================================================

    /// Exchange the refresh token for a new access token and cache it.
    pub async fn refresh_access_token(&self) -> AppResult<String> {
        let response = self
            .send_with_backoff(|| {
                self.client.post(&self.token_url).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", self.refresh_token.as_str()),
                    ("grant_type", "refresh_token"),
                ])
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Failed to refresh access token: {}",
                error_text
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        let token = token_response.access_token;

        let mut guard = self.access_token.write().await;
        *guard = Some(AccessToken {
            token: token.clone(),
            expires_at,
        });

        debug!("Refreshed Google access token; expires at {}", expires_at);
        Ok(token)
    }

    /// Cached access token if valid for at least another minute, otherwise a fresh one.
    pub async fn get_valid_access_token(&self) -> AppResult<String> {
        const REFRESH_MARGIN_SECS: i64 = 60;

        {
            let guard = self.access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_access_token().await
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Send a request, retrying 429/5xx responses and network errors.
    async fn send_with_backoff<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff_secs: u64 = 1;

        for attempt in 0..MAX_ATTEMPTS {
            match (make_request)().send().await {
                Ok(resp) => {
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                    {
                        let wait_secs = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(backoff_secs);

                        if attempt + 1 >= MAX_ATTEMPTS {
                            let status = resp.status();
                            let err_text = resp.text().await.unwrap_or_default();
                            return Err(AppError::GoogleApi(format!(
                                "Failed after {} attempts ({}): {}",
                                attempt + 1,
                                status,
                                err_text
                            )));
                        }

                        warn!(
                            "Transient Google error (status: {}). Retrying in {}s (attempt {}/{})",
                            resp.status(),
                            wait_secs,
                            attempt + 1,
                            MAX_ATTEMPTS
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                        backoff_secs *= 2;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if attempt + 1 >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(
                        "HTTP request failed: {}. Retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt + 1,
                        MAX_ATTEMPTS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs *= 2;
                }
            }
        }

        Err(AppError::GoogleApi(
            "Exceeded Google retry attempts".to_string(),
        ))
    }

    /// Send an authenticated request; a 401 refreshes the token and retries once.
    async fn send_authorized<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.get_valid_access_token().await?;
        let response = self.send_with_backoff(|| make_request(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Unauthorized Google request. Refreshing token and retrying.");
        let token = self.refresh_access_token().await?;
        let response = self.send_with_backoff(|| make_request(&token)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Unauthorized Google request: {}",
                error_text
            )));
        }

        Ok(response)
    }

    // ========================================================================
    // Event Methods
    // ========================================================================

    /// Every tagged event overlapping `range`, across all result pages.
    pub async fn list_events(&self, range: &DateRange) -> AppResult<Vec<GoogleEvent>> {
        let time_min = range
            .start_instant()
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = range
            .end_instant()
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let marker = format!("{}={}", SyncTag::MARKER_KEY, SyncTag::MARKER_VALUE);
        let url = self.events_url();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .send_authorized(|token| {
                    let mut request = self
                        .client
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[
                            ("timeMin", time_min.as_str()),
                            ("timeMax", time_max.as_str()),
                            ("singleEvents", "true"),
                            ("showDeleted", "false"),
                            ("maxResults", "250"),
                            ("privateExtendedProperty", marker.as_str()),
                        ]);
                    if let Some(ref page) = page_token {
                        request = request.query(&[("pageToken", page.as_str())]);
                    }
                    request
                })
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::GoogleApi(format!(
                    "Failed to list events ({}): {}",
                    status, error_text
                )));
            }

            let page: EventsPage = response
                .json()
                .await
                .map_err(|e| AppError::GoogleApi(format!("Failed to parse events page: {}", e)))?;
            events.extend(page.items);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(events)
    }

    /// Request body for a managed event.
    pub fn event_body(&self, draft: &EventDraft) -> GoogleEvent {
        let time_zone = draft.start.timezone().name().to_string();

        GoogleEvent {
            summary: Some(draft.title.clone()),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start: Some(EventDateTime {
                date_time: Some(draft.start.to_rfc3339()),
                date: None,
                time_zone: Some(time_zone.clone()),
            }),
            end: Some(EventDateTime {
                date_time: Some(draft.end.to_rfc3339()),
                date: None,
                time_zone: Some(time_zone),
            }),
            color_id: Some(self.color_id.clone()),
            reminders: Some(Reminders {
                use_default: false,
                overrides: vec![ReminderOverride {
                    method: "popup".to_string(),
                    minutes: self.reminder_minutes,
                }],
            }),
            extended_properties: Some(ExtendedProperties {
                private: SyncTag::encode(&draft.key),
            }),
            ..GoogleEvent::default()
        }
    }

    pub async fn insert_event(&self, draft: &EventDraft) -> AppResult<String> {
        let body = self.event_body(draft);
        let url = self.events_url();

        let response = self
            .send_authorized(|token| self.client.post(&url).bearer_auth(token).json(&body))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Failed to create event ({}): {}",
                status, error_text
            )));
        }

        let created: GoogleEvent = response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse created event: {}", e)))?;

        created
            .id
            .ok_or_else(|| AppError::GoogleApi("Created event has no id".to_string()))
    }

    pub async fn remove_event(&self, event_id: &str) -> AppResult<DeleteOutcome> {
        let url = format!("{}/{}", self.events_url(), urlencoding::encode(event_id));

        let response = self
            .send_authorized(|token| self.client.delete(&url).bearer_auth(token))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(DeleteOutcome::AlreadyAbsent),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(AppError::GoogleApi(format!(
                    "Failed to delete event {} ({}): {}",
                    event_id, status, error_text
                )))
            }
        }
    }
}

#[async_trait]
impl EventStore for GoogleCalendarService {
    async fn list_managed_events(&self, range: &DateRange) -> AppResult<Vec<DestinationEvent>> {
        let events = self
            .list_events(range)
            .await
            .map_err(|e| AppError::EventStoreRead(e.to_string()))?;
        let total = events.len();

        let managed: Vec<DestinationEvent> = events
            .iter()
            .filter_map(|event| {
                let managed = event.to_destination();
                if managed.is_none() {
                    debug!(
                        "Ignoring calendar event {:?} (cancelled, all-day or not managed)",
                        event.id
                    );
                }
                managed
            })
            .collect();

        info!(
            "Listed {} managed events ({} returned) in calendar for {}",
            managed.len(),
            total,
            range
        );
        Ok(managed)
    }

    async fn create_event(&self, draft: &EventDraft) -> AppResult<DestinationEvent> {
        let event_id = self
            .insert_event(draft)
            .await
            .map_err(|e| AppError::EventStoreWrite(e.to_string()))?;
        Ok(draft.to_event(event_id))
    }

    async fn delete_event(&self, event_id: &str) -> AppResult<DeleteOutcome> {
        self.remove_event(event_id)
            .await
            .map_err(|e| AppError::EventStoreWrite(e.to_string()))
    }
}
