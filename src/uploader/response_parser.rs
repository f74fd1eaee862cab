use serde::Deserialize;
use serde_json::Value;

use crate::errors::FailureReason;

/// Turns a 200 response body into a link, or the failure it describes.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, body: &str) -> Result<String, FailureReason>;
}

/// Top-level shape returned by the upload API. Only `rsp.stat` is typed up
/// front; the branch it selects decides which other fields are read, so a
/// field the branch ignores can never fail the decode.
#[derive(Debug, Deserialize)]
pub struct RawApiResponse {
    pub rsp: RawRsp,
}

#[derive(Debug, Deserialize)]
pub struct RawRsp {
    pub stat: Value,
    #[serde(default)]
    pub image: Option<Value>,
    #[serde(default)]
    pub error_code: Option<Value>,
    #[serde(default)]
    pub error_msg: Option<Value>,
}

/// The API is loose about scalar types (`error_code` arrives as a number
/// or a string), so any scalar is read as text. Objects, arrays and null
/// are not.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_text(value: Option<&Value>, field: &str) -> Result<String, FailureReason> {
    value
        .and_then(scalar_text)
        .ok_or_else(|| FailureReason::malformed(format!("missing or non-scalar {}", field)))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImgurResponseParser;

impl ImgurResponseParser {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseParser for ImgurResponseParser {
    fn parse(&self, body: &str) -> Result<String, FailureReason> {
        let raw: RawApiResponse = serde_json::from_str(body).map_err(|e| {
            log::error!("Failed to parse upload response as JSON: {}", e);
            log::debug!("Raw response that failed to parse: {}", body);
            FailureReason::malformed(e.to_string())
        })?;
        let rsp = raw.rsp;

        let stat = required_text(Some(&rsp.stat), "rsp.stat")?;
        if stat.eq_ignore_ascii_case("ok") {
            let page = rsp.image.as_ref().and_then(|image| image.get("imgur_page"));
            let link = required_text(page, "rsp.image.imgur_page")?;
            log::info!("Upload succeeded: {}", link);
            return Ok(link);
        }

        let code = required_text(rsp.error_code.as_ref(), "rsp.error_code")?;
        let message = required_text(rsp.error_msg.as_ref(), "rsp.error_msg")?;
        let reason = FailureReason::ApiError { code, message };
        log::warn!("{}", reason);
        Err(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<String, FailureReason> {
        ImgurResponseParser::new().parse(body)
    }

    #[test]
    fn test_ok_response_yields_page_verbatim() {
        let body = r#"{"rsp":{"stat":"ok","image":{"imgur_page":"http://imgur.com/AbC12","original_image":"x"}}}"#;
        assert_eq!(parse(body), Ok("http://imgur.com/AbC12".to_string()));
    }

    #[test]
    fn test_stat_is_case_insensitive() {
        let body = r#"{"rsp":{"stat":"OK","image":{"imgur_page":"http://imgur.com/x"}}}"#;
        assert_eq!(parse(body), Ok("http://imgur.com/x".to_string()));
    }

    #[test]
    fn test_fail_response_yields_api_error() {
        let body = r#"{"rsp":{"stat":"fail","error_code":"1003","error_msg":"Invalid image type or URL"}}"#;
        assert_eq!(
            parse(body),
            Err(FailureReason::ApiError {
                code: "1003".to_string(),
                message: "Invalid image type or URL".to_string(),
            })
        );
    }

    #[test]
    fn test_numeric_error_code_is_read_as_text() {
        let body = r#"{"rsp":{"stat":"fail","error_code":1003,"error_msg":"bad"}}"#;
        assert_eq!(
            parse(body),
            Err(FailureReason::ApiError {
                code: "1003".to_string(),
                message: "bad".to_string(),
            })
        );
    }

    #[test]
    fn test_fail_branch_ignores_unrelated_image_field() {
        let body = r#"{"rsp":{"stat":"fail","error_code":"1003","error_msg":"Invalid image type","image":"none"}}"#;
        assert_eq!(
            parse(body),
            Err(FailureReason::ApiError {
                code: "1003".to_string(),
                message: "Invalid image type".to_string(),
            })
        );
    }

    #[test]
    fn test_ok_branch_ignores_unrelated_error_fields() {
        let body = r#"{"rsp":{"stat":"ok","image":{"imgur_page":"http://imgur.com/a"},"error_code":{}}}"#;
        assert_eq!(parse(body), Ok("http://imgur.com/a".to_string()));
    }

    #[test]
    fn test_malformed_bodies() {
        for body in [
            "",
            "<html>502 Bad Gateway</html>",
            "[]",
            r#"{"stat":"ok"}"#,
            r#"{"rsp":{}}"#,
            r#"{"rsp":{"stat":"ok"}}"#,
            r#"{"rsp":{"stat":"ok","image":{}}}"#,
            r#"{"rsp":{"stat":"ok","image":{"imgur_page":null}}}"#,
            r#"{"rsp":{"stat":"fail","error_code":"1"}}"#,
            r#"{"rsp":{"stat":"fail"}}"#,
            r#"{"rsp":{"stat":"ok","image":"none"}}"#,
            r#"{"rsp":{"stat":null}}"#,
            r#"{"rsp":{"stat":"fail","error_code":{},"error_msg":"bad"}}"#,
        ] {
            assert!(
                matches!(parse(body), Err(FailureReason::MalformedResponse { .. })),
                "expected MalformedResponse for {:?}",
                body
            );
        }
    }
}
