use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::catalog;
use crate::types::EventId;

/// Correlation ids attached to a triggered event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_id: Option<String>,
}

impl EventMetadata {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Self::default() }
    }

    pub fn for_campaign(campaign_id: impl Into<String>) -> Self {
        Self { campaign_id: Some(campaign_id.into()), ..Self::default() }
    }

    pub fn for_intervention(intervention_id: impl Into<String>) -> Self {
        Self { intervention_id: Some(intervention_id.into()), ..Self::default() }
    }
}

/// A triggered occurrence. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: String,
    pub description: String,
    /// Body sent to subscribers: caller payload plus `metadata` and
    /// `timestamp`.
    pub payload: Value,
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value, metadata: EventMetadata) -> Self {
        let event_type = event_type.into();
        let created_at = Utc::now();

        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        body.insert(
            "metadata".to_string(),
            serde_json::to_value(&metadata).unwrap_or_else(|_| json!({})),
        );
        body.insert("timestamp".to_string(), Value::String(iso8601(created_at)));

        Self {
            id: EventId::generate(),
            description: catalog::describe(&event_type),
            event_type,
            payload: Value::Object(body),
            metadata,
            created_at,
        }
    }
}

pub(crate) fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    pub date: String,
    pub duration: f64,
    pub quality: f64,
    pub bedtime: String,
    pub wake_time: String,
    pub deep_sleep: f64,
    pub rem_sleep: f64,
    pub light_sleep: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSummary {
    pub average_hours: f64,
    pub quality_score: f64,
    pub sleep_debt: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub trigger: String,
    pub goal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Notification,
    Email,
    Both,
}

/// Event payloads with a documented shape, checked by construction.
///
/// Event types without a typed shape go through `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserRegistered {
        user: UserRef,
    },
    UserSleepDataUpdated {
        user: UserRef,
        sleep_data: SleepRecord,
        source: String,
    },
    CampaignUserJoined {
        campaign: CampaignRef,
        user: UserRef,
        join_date: DateTime<Utc>,
    },
    BurnoutRiskDetected {
        user: UserRef,
        risk_level: RiskLevel,
        risk_factors: Vec<String>,
        sleep_data: SleepSummary,
        recommendations: Vec<String>,
    },
    InterventionSent {
        intervention: InterventionRef,
        recipients: Vec<String>,
        message: String,
        delivery_method: DeliveryMethod,
        scheduled_at: Option<DateTime<Utc>>,
        sent_at: DateTime<Utc>,
    },
    Other {
        event_type: String,
        data: Value,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::UserRegistered { .. } => catalog::USER_REGISTERED,
            EventPayload::UserSleepDataUpdated { .. } => catalog::USER_SLEEP_DATA_UPDATED,
            EventPayload::CampaignUserJoined { .. } => catalog::CAMPAIGN_USER_JOINED,
            EventPayload::BurnoutRiskDetected { .. } => catalog::BURNOUT_RISK_DETECTED,
            EventPayload::InterventionSent { .. } => catalog::INTERVENTION_SENT,
            EventPayload::Other { event_type, .. } => event_type.as_str(),
        }
    }

    /// Body in the documented camelCase shape, without the
    /// dispatcher-stamped `timestamp`/`metadata`.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let value = match self {
            EventPayload::UserRegistered { user } => json!({ "user": user }),
            EventPayload::UserSleepDataUpdated { user, sleep_data, source } => json!({
                "user": user,
                "sleepData": sleep_data,
                "source": source,
            }),
            EventPayload::CampaignUserJoined { campaign, user, join_date } => json!({
                "campaign": campaign,
                "user": user,
                "joinDate": iso8601(*join_date),
            }),
            EventPayload::BurnoutRiskDetected {
                user,
                risk_level,
                risk_factors,
                sleep_data,
                recommendations,
            } => json!({
                "user": user,
                "riskLevel": serde_json::to_value(risk_level)?,
                "riskFactors": risk_factors,
                "sleepData": sleep_data,
                "recommendations": recommendations,
            }),
            EventPayload::InterventionSent {
                intervention,
                recipients,
                message,
                delivery_method,
                scheduled_at,
                sent_at,
            } => json!({
                "intervention": intervention,
                "recipients": recipients,
                "message": message,
                "deliveryMethod": serde_json::to_value(delivery_method)?,
                "scheduledAt": (*scheduled_at).map(iso8601),
                "sentAt": iso8601(*sent_at),
            }),
            EventPayload::Other { data, .. } => data.clone(),
        };
        Ok(value)
    }
}

fn test_user() -> Value {
    json!({
        "id": "test_user_123",
        "name": "Test User",
        "email": "test@example.com",
        "department": "Testing",
    })
}

/// Sample payload for exercising an endpoint with a given event type.
pub fn sample_payload(event_type: &str) -> Value {
    let now = Utc::now();
    let mut payload = json!({
        "event": event_type,
        "timestamp": iso8601(now),
        "environment": "test",
    });

    let extra = match event_type {
        catalog::USER_REGISTERED => {
            let mut user = test_user();
            user["joinDate"] = Value::String(iso8601(now));
            json!({ "user": user })
        }
        catalog::BURNOUT_RISK_DETECTED => json!({
            "user": test_user(),
            "riskLevel": "medium",
            "riskFactors": ["sleep_debt", "low_quality_sleep"],
            "sleepData": { "averageHours": 5.2, "qualityScore": 6.1, "sleepDebt": 8.4 },
            "recommendations": ["Increase sleep duration", "Improve sleep environment"],
        }),
        _ => json!({
            "data": {
                "message": "This is a test webhook payload",
                "testId": format!("test_{}", now.timestamp_millis()),
            }
        }),
    };

    if let (Value::Object(base), Value::Object(extra)) = (&mut payload, extra) {
        base.extend(extra);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserRef {
        UserRef {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            department: Some("Research".into()),
            join_date: None,
        }
    }

    #[test]
    fn event_stamps_metadata_and_timestamp() {
        let event = Event::new(
            catalog::CAMPAIGN_LAUNCHED,
            json!({ "campaign": { "id": "c1" } }),
            EventMetadata::for_campaign("c1"),
        );
        assert_eq!(event.payload["campaign"]["id"], "c1");
        assert_eq!(event.payload["metadata"]["campaignId"], "c1");
        assert!(event.payload["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(event.description, "A campaign has been launched");
    }

    #[test]
    fn non_object_payload_is_wrapped() {
        let event = Event::new("custom.thing", json!([1, 2]), EventMetadata::default());
        assert_eq!(event.payload["data"], json!([1, 2]));
        assert_eq!(event.payload["metadata"], json!({}));
    }

    #[test]
    fn typed_payload_matches_catalog_schema() {
        let payload = EventPayload::BurnoutRiskDetected {
            user: user(),
            risk_level: RiskLevel::High,
            risk_factors: vec!["sleep_debt".into()],
            sleep_data: SleepSummary { average_hours: 5.0, quality_score: 4.0, sleep_debt: 9.5 },
            recommendations: vec![],
        };
        let body = payload.to_json().unwrap();
        assert_eq!(payload.event_type(), catalog::BURNOUT_RISK_DETECTED);
        assert_eq!(body["riskLevel"], "high");
        assert!(catalog::check_payload(payload.event_type(), &body).is_empty());
    }

    #[test]
    fn intervention_payload_uses_documented_names() {
        let payload = EventPayload::InterventionSent {
            intervention: InterventionRef {
                id: "i1".into(),
                kind: "nudge".into(),
                trigger: "sleep_debt".into(),
                goal: "bedtime".into(),
            },
            recipients: vec!["u1".into()],
            message: "Wind down".into(),
            delivery_method: DeliveryMethod::Both,
            scheduled_at: None,
            sent_at: Utc::now(),
        };
        let body = payload.to_json().unwrap();
        assert_eq!(body["intervention"]["type"], "nudge");
        assert_eq!(body["deliveryMethod"], "both");
        assert!(catalog::check_payload(catalog::INTERVENTION_SENT, &body).is_empty());
    }

    #[test]
    fn sample_payloads_follow_event_type() {
        let burnout = sample_payload(catalog::BURNOUT_RISK_DETECTED);
        assert_eq!(burnout["environment"], "test");
        assert_eq!(burnout["riskLevel"], "medium");

        let generic = sample_payload("custom.thing");
        assert_eq!(generic["event"], "custom.thing");
        assert!(generic["data"]["testId"].as_str().unwrap().starts_with("test_"));
    }
}
