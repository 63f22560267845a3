//! Registry of known event types, their descriptions and documented
//! payload shapes.
//!
//! The catalog is descriptive: unknown event types still fan out and
//! deliver normally, they just get a generic description and no schema.

use serde_json::{json, Value};

pub const USER_REGISTERED: &str = "user.registered";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";
pub const USER_SLEEP_DATA_UPDATED: &str = "user.sleep_data.updated";
pub const USER_DEVICE_CONNECTED: &str = "user.device.connected";
pub const USER_DEVICE_DISCONNECTED: &str = "user.device.disconnected";

pub const CAMPAIGN_CREATED: &str = "campaign.created";
pub const CAMPAIGN_LAUNCHED: &str = "campaign.launched";
pub const CAMPAIGN_PAUSED: &str = "campaign.paused";
pub const CAMPAIGN_COMPLETED: &str = "campaign.completed";
pub const CAMPAIGN_USER_JOINED: &str = "campaign.user.joined";
pub const CAMPAIGN_USER_LEFT: &str = "campaign.user.left";
pub const CAMPAIGN_MILESTONE_REACHED: &str = "campaign.milestone.reached";

pub const ASSESSMENT_COMPLETED: &str = "assessment.completed";
pub const ASSESSMENT_SCORE_UPDATED: &str = "assessment.score.updated";
pub const ASSESSMENT_REMINDER_SENT: &str = "assessment.reminder.sent";

pub const BURNOUT_RISK_DETECTED: &str = "alert.burnout_risk.detected";
pub const SLEEP_DEBT_THRESHOLD_REACHED: &str = "alert.sleep_debt.threshold_reached";
pub const LOW_ENGAGEMENT_DETECTED: &str = "alert.engagement.low";
pub const PRODUCTIVITY_DECLINE_DETECTED: &str = "alert.productivity.decline";

pub const INTERVENTION_SCHEDULED: &str = "intervention.scheduled";
pub const INTERVENTION_SENT: &str = "intervention.sent";
pub const INTERVENTION_DELIVERED: &str = "intervention.delivered";
pub const INTERVENTION_RESPONDED: &str = "intervention.responded";

pub const SYSTEM_MAINTENANCE_STARTED: &str = "system.maintenance.started";
pub const SYSTEM_MAINTENANCE_COMPLETED: &str = "system.maintenance.completed";
pub const SYSTEM_BACKUP_COMPLETED: &str = "system.backup.completed";
pub const SYSTEM_ERROR_OCCURRED: &str = "system.error.occurred";

pub const DEVICE_SYNC_COMPLETED: &str = "integration.device.sync.completed";
pub const DEVICE_SYNC_FAILED: &str = "integration.device.sync.failed";
pub const API_RATE_LIMIT_REACHED: &str = "integration.api.rate_limit.reached";
pub const WEBHOOK_DELIVERY_FAILED: &str = "integration.webhook.delivery.failed";

/// Synthetic event type used by registration-time probes.
pub const WEBHOOK_TEST: &str = "webhook.test";

pub const ALL_EVENT_TYPES: &[&str] = &[
    USER_REGISTERED,
    USER_UPDATED,
    USER_DELETED,
    USER_SLEEP_DATA_UPDATED,
    USER_DEVICE_CONNECTED,
    USER_DEVICE_DISCONNECTED,
    CAMPAIGN_CREATED,
    CAMPAIGN_LAUNCHED,
    CAMPAIGN_PAUSED,
    CAMPAIGN_COMPLETED,
    CAMPAIGN_USER_JOINED,
    CAMPAIGN_USER_LEFT,
    CAMPAIGN_MILESTONE_REACHED,
    ASSESSMENT_COMPLETED,
    ASSESSMENT_SCORE_UPDATED,
    ASSESSMENT_REMINDER_SENT,
    BURNOUT_RISK_DETECTED,
    SLEEP_DEBT_THRESHOLD_REACHED,
    LOW_ENGAGEMENT_DETECTED,
    PRODUCTIVITY_DECLINE_DETECTED,
    INTERVENTION_SCHEDULED,
    INTERVENTION_SENT,
    INTERVENTION_DELIVERED,
    INTERVENTION_RESPONDED,
    SYSTEM_MAINTENANCE_STARTED,
    SYSTEM_MAINTENANCE_COMPLETED,
    SYSTEM_BACKUP_COMPLETED,
    SYSTEM_ERROR_OCCURRED,
    DEVICE_SYNC_COMPLETED,
    DEVICE_SYNC_FAILED,
    API_RATE_LIMIT_REACHED,
    WEBHOOK_DELIVERY_FAILED,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    User,
    Campaign,
    Assessment,
    Alert,
    Intervention,
    System,
    Integration,
    Other,
}

pub fn is_known(event_type: &str) -> bool {
    ALL_EVENT_TYPES.contains(&event_type)
}

pub fn category(event_type: &str) -> EventCategory {
    match event_type.split('.').next().unwrap_or_default() {
        "user" => EventCategory::User,
        "campaign" => EventCategory::Campaign,
        "assessment" => EventCategory::Assessment,
        "alert" => EventCategory::Alert,
        "intervention" => EventCategory::Intervention,
        "system" => EventCategory::System,
        "integration" => EventCategory::Integration,
        _ => EventCategory::Other,
    }
}

/// Human-readable description. Unknown types get `"Event: <type>"`.
pub fn describe(event_type: &str) -> String {
    let text = match event_type {
        USER_REGISTERED => "A new user has registered",
        USER_UPDATED => "A user profile has been updated",
        USER_DELETED => "A user has been deleted",
        USER_SLEEP_DATA_UPDATED => "User sleep data has been updated",
        USER_DEVICE_CONNECTED => "A user connected a device",
        USER_DEVICE_DISCONNECTED => "A user disconnected a device",
        CAMPAIGN_CREATED => "A campaign has been created",
        CAMPAIGN_LAUNCHED => "A campaign has been launched",
        CAMPAIGN_PAUSED => "A campaign has been paused",
        CAMPAIGN_COMPLETED => "A campaign has been completed",
        CAMPAIGN_USER_JOINED => "A user joined a campaign",
        CAMPAIGN_USER_LEFT => "A user left a campaign",
        CAMPAIGN_MILESTONE_REACHED => "A campaign milestone was reached",
        ASSESSMENT_COMPLETED => "An assessment has been completed",
        ASSESSMENT_SCORE_UPDATED => "An assessment score has been updated",
        ASSESSMENT_REMINDER_SENT => "An assessment reminder has been sent",
        BURNOUT_RISK_DETECTED => "Burnout risk detected for user",
        SLEEP_DEBT_THRESHOLD_REACHED => "Sleep debt threshold reached for user",
        LOW_ENGAGEMENT_DETECTED => "Low engagement detected",
        PRODUCTIVITY_DECLINE_DETECTED => "Productivity decline detected",
        INTERVENTION_SCHEDULED => "An intervention has been scheduled",
        INTERVENTION_SENT => "An intervention has been sent",
        INTERVENTION_DELIVERED => "An intervention has been delivered",
        INTERVENTION_RESPONDED => "A user responded to an intervention",
        SYSTEM_MAINTENANCE_STARTED => "System maintenance has started",
        SYSTEM_MAINTENANCE_COMPLETED => "System maintenance has completed",
        SYSTEM_BACKUP_COMPLETED => "System backup has completed",
        SYSTEM_ERROR_OCCURRED => "A system error occurred",
        DEVICE_SYNC_COMPLETED => "Device sync completed",
        DEVICE_SYNC_FAILED => "Device sync failed",
        API_RATE_LIMIT_REACHED => "An integration API rate limit was reached",
        WEBHOOK_DELIVERY_FAILED => "A webhook delivery permanently failed",
        WEBHOOK_TEST => "Webhook endpoint test",
        other => return format!("Event: {other}"),
    };
    text.to_string()
}

/// Documented payload shape (field -> type name) for event types that
/// have one.
pub fn schema_of(event_type: &str) -> Option<Value> {
    let schema = match event_type {
        USER_REGISTERED => json!({
            "user": {
                "id": "string",
                "name": "string",
                "email": "string",
                "department": "string",
                "joinDate": "string",
            },
            "timestamp": "string",
        }),
        USER_SLEEP_DATA_UPDATED => json!({
            "user": { "id": "string", "name": "string", "email": "string" },
            "sleepData": {
                "date": "string",
                "duration": "number",
                "quality": "number",
                "bedtime": "string",
                "wakeTime": "string",
                "deepSleep": "number",
                "remSleep": "number",
                "lightSleep": "number",
            },
            "source": "string",
            "timestamp": "string",
        }),
        CAMPAIGN_USER_JOINED => json!({
            "campaign": { "id": "string", "name": "string", "type": "string", "status": "string" },
            "user": { "id": "string", "name": "string", "email": "string", "department": "string" },
            "joinDate": "string",
            "timestamp": "string",
        }),
        BURNOUT_RISK_DETECTED => json!({
            "user": { "id": "string", "name": "string", "email": "string", "department": "string" },
            "riskLevel": "low | medium | high",
            "riskFactors": "string[]",
            "sleepData": { "averageHours": "number", "qualityScore": "number", "sleepDebt": "number" },
            "recommendations": "string[]",
            "timestamp": "string",
        }),
        INTERVENTION_SENT => json!({
            "intervention": { "id": "string", "type": "string", "trigger": "string", "goal": "string" },
            "recipients": "string[]",
            "message": "string",
            "deliveryMethod": "notification | email | both",
            "scheduledAt": "string",
            "sentAt": "string",
            "timestamp": "string",
        }),
        _ => return None,
    };
    Some(schema)
}

/// Documented top-level fields missing from `payload`.
///
/// `timestamp` is skipped because the dispatcher stamps it. Returns an
/// empty list for types without a schema.
pub fn check_payload(event_type: &str, payload: &Value) -> Vec<String> {
    let Some(Value::Object(schema)) = schema_of(event_type) else {
        return Vec::new();
    };

    schema
        .keys()
        .filter(|field| field.as_str() != "timestamp")
        .filter(|field| payload.get(field.as_str()).is_none())
        .cloned()
        .collect()
}
