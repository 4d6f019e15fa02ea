use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SilaeConfig;
use crate::error::{AppError, AppResult};
use crate::models::{DateRange, InvalidShiftError, ShiftRecord};
use crate::services::source::{FetchedShift, ShiftSource};

lazy_static! {
    static ref CSRF_TOKEN: Regex =
        Regex::new(r#"name="_csrf_token"[^>]*value="([^"]*)""#).unwrap();
    static ref PASSWORD_INPUT: Regex = Regex::new(r#"name="_password""#).unwrap();
}

const WORK_EVENT_TYPE: &str = "WORK";

// ============================================================================
// Planning Types
// ============================================================================

/// One entry of the portal's weekly planning feed.
///
/// Ids arrive as numbers or strings depending on the portal version, hence
/// the untyped fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningEvent {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub employee: Value,
    #[serde(rename = "type", default)]
    pub event_type: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub label: Option<String>,
    pub code: Option<String>,
    pub site_name: Option<String>,
    pub duration_text: Option<String>,
    #[serde(default)]
    pub break_time: Value,
    pub description: Option<String>,
}

impl PlanningEvent {
    pub fn is_work(&self) -> bool {
        self.event_type == WORK_EVENT_TYPE
    }

    pub fn employee_id(&self) -> Option<String> {
        value_to_string(&self.employee)
    }

    fn reference(&self) -> String {
        match value_to_string(&self.id) {
            Some(id) => format!("silae event {}", id),
            None => format!(
                "silae event at {}",
                self.start.as_deref().unwrap_or("unknown start")
            ),
        }
    }

    /// Validate the entry into a shift. `start`/`end` look like
    /// `2025-10-22 10:30 CEST+0200`: date, then local wall-clock time.
    pub fn to_shift(&self) -> FetchedShift {
        let reference = self.reference();

        let employee = self
            .employee_id()
            .ok_or_else(|| InvalidShiftError::new(&reference, "missing employee id"))?;
        let (date, start) = split_stamp(self.start.as_deref())
            .ok_or_else(|| InvalidShiftError::new(&reference, "unreadable start"))?;
        let (_, end) = split_stamp(self.end.as_deref())
            .ok_or_else(|| InvalidShiftError::new(&reference, "unreadable end"))?;

        let shift = ShiftRecord::parse(&employee, date, start, end)
            .map_err(|e| InvalidShiftError::new(&reference, e.reason))?;

        Ok(shift
            .with_role(self.label.clone().unwrap_or_default())
            .with_code(self.code.clone().unwrap_or_default())
            .with_location(self.site_name.clone().unwrap_or_default())
            .with_duration(self.duration_text.clone().unwrap_or_default())
            .with_break_minutes(break_minutes(&self.break_time))
            .with_notes(self.description.clone().unwrap_or_default()))
    }
}

fn split_stamp(stamp: Option<&str>) -> Option<(&str, &str)> {
    let mut parts = stamp?.split_whitespace();
    Some((parts.next()?, parts.next()?))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn break_minutes(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().and_then(|m| u32::try_from(m).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

// ============================================================================
// Silae portal client
// ============================================================================

/// Reads an employee's planning from the Silae HR portal.
///
/// The portal has no API tokens: the client logs in through the HTML form
/// and keeps the session cookie for the planning call.
#[derive(Debug, Clone)]
pub struct SilaeService {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    employee_id: String,
}

impl SilaeService {
    pub fn new(config: &SilaeConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            employee_id: config.employee_id.clone(),
        })
    }

    /// Open a portal session.
    pub async fn login(&self) -> AppResult<()> {
        let login_url = format!("{}/login", self.base_url);

        let page = self
            .client
            .get(&login_url)
            .send()
            .await
            .map_err(|e| unavailable("Failed to load login page", e))?;
        if !page.status().is_success() {
            return Err(AppError::SourceUnavailable(format!(
                "Login page returned {}",
                page.status()
            )));
        }
        let body = page
            .text()
            .await
            .map_err(|e| unavailable("Failed to read login page", e))?;

        let csrf_token = CSRF_TOKEN
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                AppError::SourceUnavailable("CSRF token not found on login page".to_string())
            })?;

        let response = self
            .client
            .post(&login_url)
            .form(&[
                ("_username", self.username.as_str()),
                ("_password", self.password.as_str()),
                ("_csrf_token", csrf_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| unavailable("Login request failed", e))?;

        if !response.status().is_success() {
            return Err(AppError::SourceUnavailable(format!(
                "Login failed with status {}",
                response.status()
            )));
        }

        // A rejected login redirects back to the form.
        let body = response
            .text()
            .await
            .map_err(|e| unavailable("Failed to read login response", e))?;
        if CSRF_TOKEN.is_match(&body) && PASSWORD_INPUT.is_match(&body) {
            return Err(AppError::SourceUnavailable(
                "Login rejected, check SILAE_USERNAME and SILAE_PASSWORD".to_string(),
            ));
        }

        debug!("Logged in to Silae portal as {}", self.username);
        Ok(())
    }

    /// Raw planning entries for every date of `range`.
    pub async fn planning_events(&self, range: &DateRange) -> AppResult<Vec<PlanningEvent>> {
        let from = range.start.format("%Y-%m-%d").to_string();
        let to = range.last_day().format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(format!("{}/planning/json/employee/events", self.base_url))
            .query(&[("from", from.as_str()), ("to", to.as_str()), ("view", "week")])
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|e| unavailable("Planning request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::SourceUnavailable(format!(
                "Planning request returned {}: {}",
                status, error_text
            )));
        }

        response
            .json::<Vec<PlanningEvent>>()
            .await
            .map_err(|e| unavailable("Failed to parse planning response", e))
    }
}

fn unavailable(context: &str, error: reqwest::Error) -> AppError {
    AppError::SourceUnavailable(format!("{}: {}", context, error))
}

#[async_trait]
impl ShiftSource for SilaeService {
    async fn fetch(&self, range: &DateRange) -> AppResult<Vec<FetchedShift>> {
        self.login().await?;
        let events = self.planning_events(range).await?;
        let total = events.len();

        let shifts: Vec<FetchedShift> = events
            .iter()
            .filter(|event| {
                let mine = event.employee_id().as_deref() == Some(self.employee_id.as_str());
                if !mine || !event.is_work() {
                    debug!(
                        "Skipping planning entry {:?} of type {} for employee {:?}",
                        event.id,
                        event.event_type,
                        event.employee_id()
                    );
                }
                mine && event.is_work()
            })
            .map(PlanningEvent::to_shift)
            .collect();

        info!(
            "Silae planning {}: {} entries, {} work shifts for employee {}",
            range,
            total,
            shifts.len(),
            self.employee_id
        );
        Ok(shifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use chrono_tz::Europe::Paris;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGIN_PAGE: &str = r#"<form method="post">
        <input type="hidden" name="_csrf_token" value="tok-123">
        <input name="_username"><input name="_password" type="password">
    </form>"#;

    fn config(base_url: String) -> SilaeConfig {
        SilaeConfig {
            base_url,
            username: "jdoe".to_string(),
            password: "secret".to_string(),
            employee_id: "1689".to_string(),
        }
    }

    fn week() -> DateRange {
        DateRange::week_containing(NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(), Paris)
    }

    async fn mount_login(server: &MockServer, after_login: &str) {
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("_csrf_token=tok-123"))
            .and(body_string_contains("_username=jdoe"))
            .respond_with(ResponseTemplate::new(200).set_body_string(after_login.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_work_shifts_of_the_employee() {
        let server = MockServer::start().await;
        mount_login(&server, "<html>Mon planning</html>").await;

        Mock::given(method("GET"))
            .and(path("/planning/json/employee/events"))
            .and(query_param("from", "2025-10-20"))
            .and(query_param("to", "2025-10-26"))
            .and(query_param("view", "week"))
            .and(header("X-Requested-With", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": 501,
                    "employee": 1689,
                    "type": "WORK",
                    "start": "2025-10-22 10:30 CEST+0200",
                    "end": "2025-10-22 18:30 CEST+0200",
                    "label": "Reception",
                    "code": "REC",
                    "durationText": "8h",
                    "siteName": "Hotel Lutetia",
                    "breakTime": 30,
                    "description": " "
                },
                {
                    "id": 502,
                    "employee": "1689",
                    "type": "ABSENCE",
                    "start": "2025-10-23 00:00 CEST+0200",
                    "end": "2025-10-23 23:59 CEST+0200",
                    "label": "Rest day"
                },
                {
                    "id": 503,
                    "employee": 7,
                    "type": "WORK",
                    "start": "2025-10-22 07:00 CEST+0200",
                    "end": "2025-10-22 15:00 CEST+0200",
                    "label": "Night audit"
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        let shifts = silae.fetch(&week()).await.unwrap();

        assert_eq!(shifts.len(), 1);
        let shift = shifts[0].as_ref().unwrap();
        assert_eq!(shift.employee_id(), "1689");
        assert_eq!(shift.key().to_string(), "1689@2025-10-22 10:30");
        assert_eq!(shift.title(), "Reception");
        assert_eq!(
            shift.description().as_deref(),
            Some("Code: REC\nRole: Reception\nDuration: 8h\nBreak: 30 min")
        );
        assert_eq!(shift.to_draft(&Paris).location.as_deref(), Some("Hotel Lutetia"));
    }

    #[tokio::test]
    async fn malformed_entries_are_reported_not_fatal() {
        let server = MockServer::start().await;
        mount_login(&server, "<html>ok</html>").await;

        Mock::given(method("GET"))
            .and(path("/planning/json/employee/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "a-1",
                    "employee": 1689,
                    "type": "WORK",
                    "start": "2025-10-21",
                    "end": "2025-10-21 16:00 CEST+0200"
                },
                {
                    "id": "a-2",
                    "employee": 1689,
                    "type": "WORK",
                    "start": "2025-10-24 22:00 CEST+0200",
                    "end": "2025-10-25 06:00 CEST+0200",
                    "breakTime": "0"
                }
            ])))
            .mount(&server)
            .await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        let shifts = silae.fetch(&week()).await.unwrap();

        assert_eq!(shifts.len(), 2);
        let invalid = shifts[0].as_ref().unwrap_err();
        assert_eq!(invalid.reference, "silae event a-1");
        let overnight = shifts[1].as_ref().unwrap();
        assert!(overnight.is_overnight());
        assert_eq!(overnight.description(), None);
    }

    #[tokio::test]
    async fn missing_csrf_token_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        let err = silae.fetch(&week()).await.unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable(ref m) if m.contains("CSRF")));
    }

    #[tokio::test]
    async fn rejected_credentials_are_unavailable() {
        let server = MockServer::start().await;
        mount_login(&server, LOGIN_PAGE).await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        let err = silae.login().await.unwrap_err();
        assert_eq!(err.code(), "SOURCE_UNAVAILABLE");
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn csrf_form_without_password_is_not_a_rejection() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            r#"<form method="post"><input type="hidden" name="_csrf_token" value="x"></form>"#,
        )
        .await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        tokio_test::assert_ok!(silae.login().await);
    }

    #[tokio::test]
    async fn planning_error_status_is_unavailable() {
        let server = MockServer::start().await;
        mount_login(&server, "<html>ok</html>").await;
        Mock::given(method("GET"))
            .and(path("/planning/json/employee/events"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let silae = SilaeService::new(&config(server.uri())).unwrap();
        let err = silae.fetch(&week()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
