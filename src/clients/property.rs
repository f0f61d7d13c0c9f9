use serde_json::Value;
use tracing::warn;

use super::ClientError;

/// One active tenancy as reported by the property-management system.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub id: String,
    pub tenant_id: Option<String>,
    /// Structured unit number when the API provides one.
    pub unit_number: Option<String>,
    /// Free-text unit name, kept for the best-effort fallback.
    pub unit_name: String,
    pub property_address: Option<String>,
}

impl Lease {
    /// Parse the remote lease payload eagerly into a typed record. Shape
    /// drift in the remote API surfaces here and nowhere deeper.
    pub fn from_payload(payload: &Value) -> Result<Self, ClientError> {
        let id = string_field(payload, "id")
            .ok_or_else(|| ClientError::Payload("lease payload missing id".to_string()))?;

        let unit = payload.get("unit");
        let unit_number = string_field(payload, "unitNumber")
            .or_else(|| unit.and_then(|u| string_field(u, "number")));
        let unit_name = unit
            .and_then(|u| string_field(u, "name"))
            .unwrap_or_default();

        let property_address = address_of(payload.get("property"))
            .or_else(|| address_of(unit.and_then(|u| u.get("property"))));

        Ok(Self {
            id,
            tenant_id: string_field(payload, "tenantId"),
            unit_number,
            unit_name,
            property_address,
        })
    }

    /// Stable unit identifier: the structured field when present, otherwise
    /// the first integer in the free-text unit name. The fallback is
    /// best-effort and logs every use.
    pub fn unit_identifier(&self) -> Option<String> {
        if let Some(number) = &self.unit_number {
            let trimmed = number.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }

        match first_integer(&self.unit_name) {
            Some(unit) => {
                warn!(
                    lease = %self.id,
                    unit_name = %self.unit_name,
                    unit = %unit,
                    "resolved unit number from free text"
                );
                Some(unit)
            }
            None => None,
        }
    }
}

/// A tenant on a lease, as much of it as notifications need.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

/// An open maintenance ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceTicket {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub unit_number: Option<String>,
}

impl MaintenanceTicket {
    pub fn from_payload(payload: &Value) -> Result<Self, ClientError> {
        let id = string_field(payload, "id")
            .ok_or_else(|| ClientError::Payload("ticket payload missing id".to_string()))?;
        Ok(Self {
            id,
            subject: string_field(payload, "subject").unwrap_or_default(),
            description: string_field(payload, "description").unwrap_or_default(),
            unit_number: string_field(payload, "unitNumber")
                .or_else(|| payload.get("unit").and_then(|u| string_field(u, "number"))),
        })
    }

    /// Unit resolution for tickets: structured field first, then a scan of
    /// the text for "unit <n>". Logged when the scan is what answered.
    pub fn unit_hint(&self) -> Option<String> {
        if let Some(number) = &self.unit_number {
            if !number.trim().is_empty() {
                return Some(number.trim().to_string());
            }
        }

        let text = format!("{} {}", self.subject, self.description);
        match unit_from_text(&text) {
            Some(unit) => {
                warn!(ticket = %self.id, unit = %unit, "resolved unit number from ticket text");
                Some(unit)
            }
            None => None,
        }
    }
}

/// One invoice line. Negative amounts are credits.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub amount: f64,
}

/// Property-management collaborator boundary. Implementations are thin
/// transport wrappers; everything behind this trait is typed.
pub trait PropertyManagementApi: Send + Sync {
    fn active_leases(&self, property_id: &str) -> Result<Vec<Lease>, ClientError>;
    fn lease_balance(&self, lease_id: &str) -> Result<f64, ClientError>;
    fn tenants_by_lease(&self, lease_id: &str) -> Result<Vec<Tenant>, ClientError>;
    fn maintenance_tickets(
        &self,
        property_id: &str,
        status: &str,
    ) -> Result<Vec<MaintenanceTicket>, ClientError>;
    fn create_recurring_charge(
        &self,
        lease_id: &str,
        description: &str,
        amount: f64,
    ) -> Result<String, ClientError>;
    fn update_recurring_charge(
        &self,
        charge_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<(), ClientError>;
    fn delete_recurring_charge(&self, charge_id: &str) -> Result<(), ClientError>;
    fn create_invoice(&self, tenant_id: &str, line_items: &[LineItem])
        -> Result<String, ClientError>;
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn address_of(property: Option<&Value>) -> Option<String> {
    let property = property?;
    string_field(property, "address").or_else(|| string_field(property, "name"))
}

fn first_integer(text: &str) -> Option<String> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

fn unit_from_text(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let idx = lower.find("unit")?;
    let rest = &lower[idx + "unit".len()..];
    let rest = rest.trim_start_matches([' ', '#', ':']);
    first_integer(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lease_parses_structured_unit_number() {
        let lease = Lease::from_payload(&json!({
            "id": 1204,
            "tenantId": "t-9",
            "unitNumber": "14",
            "property": {"address": "350 S Harper"}
        }))
        .expect("parse lease");
        assert_eq!(lease.id, "1204");
        assert_eq!(lease.unit_identifier().as_deref(), Some("14"));
        assert_eq!(lease.property_address.as_deref(), Some("350 S Harper"));
    }

    #[test]
    fn lease_falls_back_to_first_integer_in_unit_name() {
        let lease = Lease::from_payload(&json!({
            "id": "77",
            "unit": {"name": "Bldg B - Apt 12", "property": {"name": "350 S Harper"}}
        }))
        .expect("parse lease");
        assert_eq!(lease.unit_identifier().as_deref(), Some("12"));
        assert_eq!(lease.property_address.as_deref(), Some("350 S Harper"));
    }

    #[test]
    fn lease_without_any_unit_yields_none() {
        let lease = Lease::from_payload(&json!({"id": "5", "unit": {"name": "Penthouse"}}))
            .expect("parse lease");
        assert_eq!(lease.unit_identifier(), None);
    }

    #[test]
    fn lease_payload_without_id_is_rejected() {
        let err = Lease::from_payload(&json!({"unitNumber": "3"})).expect_err("missing id");
        assert!(matches!(err, ClientError::Payload(_)));
    }

    #[test]
    fn ticket_unit_hint_scans_text() {
        let ticket = MaintenanceTicket {
            id: "t-1".to_string(),
            subject: "Internet down".to_string(),
            description: "No service in Unit #23 since Tuesday".to_string(),
            unit_number: None,
        };
        assert_eq!(ticket.unit_hint().as_deref(), Some("23"));

        let ticket = MaintenanceTicket {
            id: "t-2".to_string(),
            subject: "Leaky faucet".to_string(),
            description: "kitchen sink".to_string(),
            unit_number: None,
        };
        assert_eq!(ticket.unit_hint(), None);
    }
}
