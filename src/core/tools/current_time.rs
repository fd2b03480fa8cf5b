//! `getCurrentTime` capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};

use super::{Tool, ToolError};
use crate::core::realtime::FunctionDeclaration;

pub const CURRENT_TIME_TOOL: &str = "getCurrentTime";

/// Reports the wall-clock time in an IANA timezone.
pub struct CurrentTimeTool {
    now: fn() -> DateTime<Utc>,
}

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self { now: Utc::now }
    }

    /// Use a fixed time source.
    pub fn with_clock(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Format the answer for `timezone`.
    ///
    /// Every outcome is a sentence the model can read back; failures are not
    /// errors from the model's point of view.
    pub fn describe(&self, timezone: &str) -> String {
        if timezone.is_empty() {
            return "Sorry, a timezone must be provided.".to_string();
        }

        match timezone.parse::<Tz>() {
            Ok(tz) => {
                let local = (self.now)().with_timezone(&tz);
                format!(
                    "The current time for the timezone {timezone} is {}.",
                    local.format("%I:%M %p")
                )
            }
            Err(_) => format!(
                "Sorry, I could not get the time for the timezone: {timezone}. It might be an invalid identifier."
            ),
        }
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        CURRENT_TIME_TOOL
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: CURRENT_TIME_TOOL.to_string(),
            description: "Gets the current time for a given IANA timezone identifier.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "timezone": {
                        "type": "STRING",
                        "description": "The IANA timezone identifier, e.g. \"America/New_York\" or \"Europe/Paris\"."
                    }
                },
                "required": ["timezone"]
            }),
        }
    }

    async fn call(&self, args: &Value) -> Result<String, ToolError> {
        let timezone = args
            .get("timezone")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("timezone must be a string".to_string()))?;
        Ok(self.describe(timezone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 14, 5, 0).unwrap()
    }

    #[test]
    fn test_valid_timezone() {
        let tool = CurrentTimeTool::with_clock(fixed_now);
        assert_eq!(
            tool.describe("Asia/Tokyo"),
            "The current time for the timezone Asia/Tokyo is 11:05 PM."
        );
        assert_eq!(
            tool.describe("America/New_York"),
            "The current time for the timezone America/New_York is 09:05 AM."
        );
    }

    #[test]
    fn test_empty_timezone() {
        let tool = CurrentTimeTool::with_clock(fixed_now);
        assert_eq!(tool.describe(""), "Sorry, a timezone must be provided.");
    }

    #[test]
    fn test_invalid_timezone() {
        let tool = CurrentTimeTool::with_clock(fixed_now);
        assert_eq!(
            tool.describe("Mars/Olympus"),
            "Sorry, I could not get the time for the timezone: Mars/Olympus. It might be an invalid identifier."
        );
    }

    #[tokio::test]
    async fn test_call_requires_string_timezone() {
        let tool = CurrentTimeTool::with_clock(fixed_now);
        assert!(matches!(
            tool.call(&json!({"timezone": 5})).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(tool.call(&json!({"timezone": "UTC"})).await.is_ok());
    }

    #[test]
    fn test_declaration_schema() {
        let declaration = CurrentTimeTool::new().declaration();
        assert_eq!(declaration.name, "getCurrentTime");
        assert_eq!(declaration.parameters["required"], json!(["timezone"]));
        assert_eq!(
            declaration.parameters["properties"]["timezone"]["type"],
            "STRING"
        );
    }
}
