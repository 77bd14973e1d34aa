//! Relay global ids: `base64("<TypeName>:<uuid>")`

use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

use crate::models::{EntityKind, ValidationError};

pub fn encode(kind: EntityKind, id: Uuid) -> String {
    STANDARD.encode(format!("{}:{}", kind.graphql_type_name(), id))
}

/// Decode a global id into its entity kind and row id
pub fn decode(global_id: &str) -> Result<(EntityKind, Uuid), ValidationError> {
    let invalid = || ValidationError::InvalidId(global_id.to_string());

    let bytes = STANDARD.decode(global_id.trim()).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (type_name, raw) = text.split_once(':').ok_or_else(invalid)?;
    let kind = EntityKind::from_graphql_type_name(type_name).ok_or_else(invalid)?;
    let id = Uuid::parse_str(raw).map_err(|_| invalid())?;
    Ok((kind, id))
}

/// Accept either a raw UUID or a global id of the expected kind
pub fn parse_id(value: &str, expected: EntityKind) -> Result<Uuid, ValidationError> {
    if let Ok(id) = Uuid::parse_str(value.trim()) {
        return Ok(id);
    }
    match decode(value)? {
        (kind, id) if kind == expected => Ok(id),
        _ => Err(ValidationError::InvalidId(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_relay_format() {
        let id = Uuid::parse_str("5b2f7b3e-3d4c-4a57-9f2e-6a8f0b1c2d3e").unwrap();
        let encoded = encode(EntityKind::ContributionPlan, id);
        let decoded = String::from_utf8(STANDARD.decode(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, format!("ContributionPlanGQLType:{}", id));
        assert_eq!(decode(&encoded).unwrap(), (EntityKind::ContributionPlan, id));
    }

    #[test]
    fn test_parse_id_accepts_raw_and_global() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), EntityKind::PaymentPlan).unwrap(), id);
        assert_eq!(
            parse_id(&encode(EntityKind::PaymentPlan, id), EntityKind::PaymentPlan).unwrap(),
            id
        );
        assert!(parse_id(&encode(EntityKind::ContributionPlan, id), EntityKind::PaymentPlan).is_err());
        assert!(parse_id("not-an-id", EntityKind::PaymentPlan).is_err());
    }
}
