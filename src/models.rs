use serde::{Deserialize, Serialize};

/// Body of `GET /hello/json`. `birthdate` is plain `YYYY/MM/DD` text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloJson {
    pub name: String,
    pub age: u32,
    pub birthdate: String,
}

impl HelloJson {
    pub fn yamada() -> Self {
        Self {
            name: "Yamada".to_string(),
            age: 20,
            birthdate: "2000/12/25".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fruit {
    pub id: i64,
    pub name: String,
}

/// Payload accepted by `POST /fruits` and `PUT /fruits/{id}`.
///
/// Both fields are optional on the wire so the handlers can reject a
/// client-chosen id on create, or a missing name on update, with a 422
/// instead of a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FruitPayload {
    pub id: Option<i64>,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_json_serializes_fixed_fields() {
        let value = serde_json::to_value(HelloJson::yamada()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"name": "Yamada", "age": 20, "birthdate": "2000/12/25"})
        );
    }

    #[test]
    fn fruit_payload_accepts_partial_bodies() {
        let payload: FruitPayload = serde_json::from_str(r#"{"name":"Pear"}"#).unwrap();
        assert_eq!(payload.id, None);
        assert_eq!(payload.name.as_deref(), Some("Pear"));
    }
}
