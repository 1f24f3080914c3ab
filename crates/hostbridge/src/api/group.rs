//! Group operations.

use indexmap::IndexMap;

use crate::bridge::value::{MapKey, Value};
use crate::invoke::{Invoke, InvokeError, InvokeOptions};

pub const CREATE_MEMBER_LIST_SCENE: &str = "nodeIKernelGroupService/createMemberListScene";
pub const GET_NEXT_MEMBER_LIST: &str = "nodeIKernelGroupService/getNextMemberList";
pub const MEMBER_LIST_CHANGE: &str = "nodeIKernelGroupListener/onMemberListChange";

const MEMBER_LIST_SCENE: &str = "groupMemberList_MainWindow";

/// Fetch up to `count` members of a group, keyed by member uid.
///
/// Opens a member-list scene, then asks for the next page. The page arrives
/// as a member-list change push for the same scene.
pub async fn get_member_list(
    invoker: &dyn Invoke,
    group_code: &str,
    count: u32,
) -> Result<IndexMap<MapKey, Value>, InvokeError> {
    let scene = invoker
        .invoke(
            CREATE_MEMBER_LIST_SCENE,
            vec![Value::from(group_code), Value::from(MEMBER_LIST_SCENE)],
            InvokeOptions::new(),
        )
        .await?;
    let scene_id = scene
        .get("sceneId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InvokeError::MissingField {
            operation: CREATE_MEMBER_LIST_SCENE.to_string(),
            field: "sceneId",
        })?;
    tracing::debug!(group_code, %scene_id, count, "Member list scene open");

    let requested = scene_id.clone();
    let options = InvokeOptions::new()
        .with_result_tag(MEMBER_LIST_CHANGE)
        .with_result_predicate(move |push, ack| {
            // the ack names the scene when the host assigns its own
            let expected = ack
                .get("sceneId")
                .and_then(Value::as_str)
                .unwrap_or(&requested);
            push.get("sceneId").and_then(Value::as_str) == Some(expected)
        });
    let args = vec![Value::from(scene_id), Value::Null, Value::from(i64::from(count))];
    let push = invoker.invoke(GET_NEXT_MEMBER_LIST, args, options).await?;

    match push.get("infos") {
        Some(Value::Map(infos)) => Ok(infos.clone()),
        _ => Err(InvokeError::MissingField {
            operation: GET_NEXT_MEMBER_LIST.to_string(),
            field: "infos",
        }),
    }
}
