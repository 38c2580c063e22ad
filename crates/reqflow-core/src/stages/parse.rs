//! Parsing model output into typed structures

use serde::de::DeserializeOwned;

use crate::model_call::OutputError;

/// Strip markdown code fences and any prose around the outermost JSON object
pub fn json_body(text: &str) -> &str {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

/// Parse model output as `T`
///
/// Output that is not JSON is malformed; JSON of the wrong shape is a
/// schema violation.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, OutputError> {
    let body = json_body(text);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| OutputError::Malformed(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| OutputError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_plain_json() {
        assert_eq!(parse_json::<Sample>(r#"{"value": 3}"#).unwrap(), Sample { value: 3 });
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"value\": 4}\n```\n";
        assert_eq!(parse_json::<Sample>(text).unwrap(), Sample { value: 4 });
    }

    #[test]
    fn test_malformed_vs_schema() {
        assert!(matches!(parse_json::<Sample>("nope"), Err(OutputError::Malformed(_))));
        assert!(matches!(
            parse_json::<Sample>(r#"{"other": 1}"#),
            Err(OutputError::Schema(_))
        ));
    }
}
