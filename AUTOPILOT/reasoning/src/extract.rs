use serde::de::DeserializeOwned;

use crate::ReasoningError;

/// Slice from the first `{` to the last `}`.
#[must_use]
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Slice from the first `[` to the last `]`.
#[must_use]
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end >= start).then(|| &text[start..=end])
}

/// Parses a JSON object, first verbatim, then from the embedded block.
///
/// # Errors
/// Returns [`ReasoningError::Malformed`] when neither form parses.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, ReasoningError> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }
    let block = extract_json_block(text)
        .ok_or_else(|| ReasoningError::Malformed("no JSON object in output".into()))?;
    serde_json::from_str(block).map_err(|err| ReasoningError::Malformed(err.to_string()))
}

/// Parses a JSON list.
///
/// Accepts a bare array, an array embedded in prose, or an object carrying the array under
/// `key` (e.g. `{"actions": [...]}`).
///
/// # Errors
/// Returns [`ReasoningError::Malformed`] when no form parses.
pub fn parse_json_list<T: DeserializeOwned>(
    text: &str,
    key: &str,
) -> Result<Vec<T>, ReasoningError> {
    if let Ok(list) = serde_json::from_str::<Vec<T>>(text.trim()) {
        return Ok(list);
    }
    if let Some(block) = extract_json_block(text) {
        if let Ok(serde_json::Value::Object(mut map)) = serde_json::from_str(block) {
            if let Some(inner) = map.remove(key) {
                return serde_json::from_value(inner)
                    .map_err(|err| ReasoningError::Malformed(err.to_string()));
            }
        }
    }
    let slice = extract_json_array(text)
        .ok_or_else(|| ReasoningError::Malformed("no JSON array in output".into()))?;
    serde_json::from_str(slice).map_err(|err| ReasoningError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: String,
    }

    #[test]
    fn list_is_found_in_prose_or_wrapper() {
        let prose = "Sure! Here you go:\n[{\"id\": \"a\"}, {\"id\": \"b\"}]\nThanks.";
        let list: Vec<Item> = parse_json_list(prose, "actions").unwrap();
        assert_eq!(list.len(), 2);

        let wrapped = "```json\n{\"actions\": [{\"id\": \"c\"}]}\n```";
        let list: Vec<Item> = parse_json_list(wrapped, "actions").unwrap();
        assert_eq!(list, vec![Item { id: "c".into() }]);
    }

    #[test]
    fn truncated_output_is_malformed() {
        let truncated = "[{\"id\": \"a\"}, {\"id\": ";
        assert!(matches!(
            parse_json_list::<Item>(truncated, "actions"),
            Err(ReasoningError::Malformed(_))
        ));
        assert!(extract_json_block("} nothing {").is_none());
    }

    #[test]
    fn object_parses_from_fenced_block() {
        let text = "verdict follows {\"id\": \"x\"} end";
        let item: Item = parse_json_object(text).unwrap();
        assert_eq!(item.id, "x");
    }
}
