use chrono::NaiveDate;
use serde_json::Value;

use super::property::LineItem;
use super::ClientError;

/// Authoritative service status in the billing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Suspended,
    Ended,
}

impl ServiceState {
    /// The billing API encodes status as a small integer.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Active,
            3 => Self::Suspended,
            _ => Self::Ended,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Ended => "ended",
        }
    }
}

/// One subscription in the billing system.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingService {
    pub id: String,
    pub client_id: String,
    pub plan_id: String,
    pub state: ServiceState,
}

impl BillingService {
    pub fn from_payload(payload: &Value) -> Result<Self, ClientError> {
        let id = non_empty(payload, "id")
            .ok_or_else(|| ClientError::Payload("service payload missing id".to_string()))?;
        let client_id = non_empty(payload, "clientId")
            .ok_or_else(|| ClientError::Payload("service payload missing clientId".to_string()))?;
        let state = payload
            .get("status")
            .and_then(Value::as_i64)
            .map(ServiceState::from_code)
            .unwrap_or(ServiceState::Ended);

        Ok(Self {
            id,
            client_id,
            plan_id: non_empty(payload, "servicePlanId").unwrap_or_default(),
            state,
        })
    }
}

/// Fields a service update may carry; unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServicePatch {
    pub plan_id: Option<String>,
    pub state: Option<ServiceState>,
}

/// A new billing client registration.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
}

/// Billing/CRM sub-interface of the subscriber-management platform.
pub trait BillingApi: Send + Sync {
    fn create_client(&self, client: &NewClient) -> Result<String, ClientError>;
    fn create_service(
        &self,
        client_id: &str,
        plan_id: &str,
        active_from: NaiveDate,
    ) -> Result<String, ClientError>;
    fn update_service(&self, service_id: &str, patch: &ServicePatch) -> Result<(), ClientError>;
    fn services(&self, client_id: &str) -> Result<Vec<BillingService>, ClientError>;
    fn create_ticket(
        &self,
        client_id: &str,
        subject: &str,
        message: &str,
        device_id: Option<&str>,
    ) -> Result<String, ClientError>;
    fn create_invoice(&self, client_id: &str, items: &[LineItem]) -> Result<String, ClientError>;
}

/// A network termination device as the NMS reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: Option<String>,
    pub serial: Option<String>,
    pub mac: Option<String>,
}

impl Device {
    /// The NMS nests identity under an `identification` object.
    pub fn from_payload(payload: &Value) -> Result<Self, ClientError> {
        let ident = payload.get("identification").unwrap_or(payload);
        let id = non_empty(ident, "id")
            .or_else(|| non_empty(payload, "id"))
            .ok_or_else(|| ClientError::Payload("device payload missing id".to_string()))?;
        Ok(Self {
            id,
            name: non_empty(ident, "name"),
            serial: non_empty(ident, "serialNumber"),
            mac: non_empty(ident, "mac"),
        })
    }

    /// Serial/MAC comparison ignores case and colon separators.
    pub fn matches_serial(&self, serial: &str) -> bool {
        let wanted = normalize_serial(serial);
        self.serial
            .as_deref()
            .map(normalize_serial)
            .is_some_and(|s| s == wanted)
            || self
                .mac
                .as_deref()
                .map(normalize_serial)
                .is_some_and(|m| m == wanted)
    }
}

fn normalize_serial(raw: &str) -> String {
    raw.to_lowercase().replace(':', "")
}

/// Device/network-management sub-interface.
pub trait NetworkApi: Send + Sync {
    fn find_device_by_serial(&self, serial: &str) -> Result<Option<Device>, ClientError>;
    fn authorize_device(&self, device_id: &str, name: &str, site_id: &str)
        -> Result<(), ClientError>;
    fn activate_device(&self, device_id: &str) -> Result<(), ClientError>;
    fn suspend_device(&self, device_id: &str, reason: &str) -> Result<(), ClientError>;
    fn set_device_bandwidth(
        &self,
        device_id: &str,
        down_mbps: u32,
        up_mbps: u32,
    ) -> Result<(), ClientError>;
}

fn non_empty(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_state_decodes_status_codes() {
        assert_eq!(ServiceState::from_code(1), ServiceState::Active);
        assert_eq!(ServiceState::from_code(3), ServiceState::Suspended);
        assert_eq!(ServiceState::from_code(99), ServiceState::Ended);
    }

    #[test]
    fn billing_service_parses_payload() {
        let service = BillingService::from_payload(&json!({
            "id": 510,
            "clientId": 42,
            "servicePlanId": 7,
            "status": 3
        }))
        .expect("parse service");
        assert_eq!(service.id, "510");
        assert_eq!(service.client_id, "42");
        assert_eq!(service.state, ServiceState::Suspended);
    }

    #[test]
    fn device_parses_nested_identification() {
        let device = Device::from_payload(&json!({
            "identification": {
                "id": "dev-1",
                "name": "350-s-harper-1",
                "serialNumber": "UBNT1234",
                "mac": "AA:BB:CC:DD:EE:FF"
            }
        }))
        .expect("parse device");
        assert_eq!(device.id, "dev-1");
        assert!(device.matches_serial("ubnt1234"));
        assert!(device.matches_serial("aabbccddeeff"));
        assert!(!device.matches_serial("other"));
    }
}
