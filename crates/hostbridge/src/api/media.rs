//! Rich media operations.

use crate::bridge::value::Value;
use crate::invoke::{Invoke, InvokeError, InvokeOptions};

pub const GET_RICH_MEDIA_FILE_DOWN_URL: &str =
    "nodeIKernelRichMediaService/getRichMediaFileDownUrl";

/// Resolve a download URL for an uploaded media file.
pub async fn get_media_url(
    invoker: &dyn Invoke,
    file_uuid: &str,
    is_group: bool,
) -> Result<String, InvokeError> {
    let request = Value::object([
        ("fileModelId", Value::from("0")),
        ("downSourceType", Value::from(0)),
        ("triggerType", Value::from(1)),
        ("needIpv6", Value::from(false)),
        ("fileUuid", Value::from(file_uuid)),
        ("downloadType", Value::from(if is_group { 1 } else { 2 })),
    ]);
    let reply = invoker
        .invoke(GET_RICH_MEDIA_FILE_DOWN_URL, vec![request], InvokeOptions::new())
        .await?;

    reply
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| InvokeError::MissingField {
            operation: GET_RICH_MEDIA_FILE_DOWN_URL.to_string(),
            field: "url",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockInvoke;
    use serde_json::json;

    #[tokio::test]
    async fn returns_url_field() {
        let invoker = MockInvoke::new();
        invoker.respond_json(json!({"result": 0, "url": "https://multimedia.example/download?appid=1407"}));

        let url = get_media_url(&invoker, "uuid-1", true).await.unwrap();
        assert_eq!(url, "https://multimedia.example/download?appid=1407");

        let call = invoker.calls().pop().unwrap();
        assert_eq!(call.operation, GET_RICH_MEDIA_FILE_DOWN_URL);
        assert!(call.options.result_tag.is_none());
        let request = &call.args[0];
        assert_eq!(request.get("fileUuid").and_then(Value::as_str), Some("uuid-1"));
        assert_eq!(request.get("downloadType").and_then(Value::as_i64), Some(1));
    }

    #[tokio::test]
    async fn private_chat_download_type() {
        let invoker = MockInvoke::new();
        invoker.respond_json(json!({"url": "u"}));
        get_media_url(&invoker, "uuid-2", false).await.unwrap();
        let call = invoker.calls().pop().unwrap();
        assert_eq!(call.args[0].get("downloadType").and_then(Value::as_i64), Some(2));
    }

    #[tokio::test]
    async fn empty_or_missing_url_is_an_error() {
        let invoker = MockInvoke::new();
        invoker
            .respond_json(json!({"result": 0}))
            .respond_json(json!({"result": 0, "url": ""}));
        for _ in 0..2 {
            let err = get_media_url(&invoker, "uuid-3", true).await.unwrap_err();
            assert!(matches!(err, InvokeError::MissingField { field: "url", .. }));
        }
    }
}
