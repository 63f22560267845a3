use std::collections::BTreeMap;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const USER_AGENT: &str = "User-Agent";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Product-specific header names, e.g. `X-SleepFix-Event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHeaderNames {
    pub event: String,
    pub delivery: String,
    pub signature: String,
    pub user_agent: String,
}

impl DeliveryHeaderNames {
    pub fn for_product(product: &str) -> Self {
        Self {
            event: format!("X-{product}-Event"),
            delivery: format!("X-{product}-Delivery"),
            signature: format!("X-{product}-Signature"),
            user_agent: format!("{product}-Webhook/1.0"),
        }
    }

    /// Header names a subscription's custom headers may not set.
    pub fn is_reserved(&self, name: &str) -> bool {
        [CONTENT_TYPE, USER_AGENT, self.event.as_str(), self.delivery.as_str(), self.signature.as_str()]
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
    }

    /// Drop reserved names from a custom header map, returning the
    /// names that were removed.
    pub fn strip_reserved(&self, headers: &mut BTreeMap<String, String>) -> Vec<String> {
        let removed: Vec<String> = headers
            .keys()
            .filter(|name| self.is_reserved(name))
            .cloned()
            .collect();
        for name in &removed {
            headers.remove(name);
        }
        removed
    }
}
