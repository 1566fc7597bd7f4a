use serde::Deserialize;
use serde_json::Value;

use crate::routing::topic::LEVEL_SEPARATOR;

/// Keys meters have used for the user id, in lookup order.
const USER_ID_KEYS: [&str; 3] = ["ClientId", "clientId", "userId"];

const VALUE_KEYS: [&str; 2] = ["Value", "value"];

const RESET_COMMAND: &str = "reset";

/// A meter reading as published on the readings topics.
///
/// Decoding is lenient about key casing and accepts the value as a JSON
/// number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct ReadingPayload {
    pub user_id: String,
    pub value: f64,
}

impl TryFrom<Value> for ReadingPayload {
    type Error = String;

    fn try_from(payload: Value) -> Result<Self, Self::Error> {
        let Value::Object(fields) = payload else {
            return Err("reading payload is not a JSON object".to_string());
        };

        let user_id = USER_ID_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(user_id_of))
            .ok_or_else(|| "reading payload has no user id".to_string())?;

        let value = VALUE_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(number_of))
            .ok_or_else(|| format!("reading for '{user_id}' has no numeric value"))?;

        Ok(Self { user_id, value })
    }
}

fn user_id_of(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn number_of(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// The user targeted by a billing command topic such as
/// `meters/billing/{user}/reset`, or `None` for any other topic.
pub fn reset_target(topic: &str) -> Option<&str> {
    let levels: Vec<&str> = topic
        .split(LEVEL_SEPARATOR)
        .filter(|level| !level.is_empty())
        .collect();

    match levels.as_slice() {
        [_, .., user, command] if command.eq_ignore_ascii_case(RESET_COMMAND) => Some(*user),
        _ => None,
    }
}
