//! 编码与辅助工具
//!
//! 成员集合在本地数据库中以逗号拼接的 TEXT 列存储（ID 为 UUID，
//! 不含逗号），编码时排序去重以保证确定性。

use uuid::Uuid;

/// 把用户 ID 集合编码为逗号拼接的字符串（排序去重后拼接）
pub fn encode_id_set(ids: &[String]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

/// 从逗号拼接的字符串还原用户 ID 列表，空串还原为空列表
pub fn decode_id_set(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// 生成全局唯一的消息/会话 ID
///
/// ID 由写入方在创建时生成，之后不再变更，远端按同一 ID 存档。
pub fn generate_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// 当前时间（Unix 毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_set_roundtrip_is_sorted_and_deduped() {
        let ids = vec!["bbb".to_string(), "aaa".to_string(), "bbb".to_string()];
        let encoded = encode_id_set(&ids);
        assert_eq!(encoded, "aaa,bbb");
        assert_eq!(decode_id_set(&encoded), vec!["aaa", "bbb"]);
    }

    #[test]
    fn empty_id_set_roundtrip() {
        assert_eq!(encode_id_set(&[]), "");
        assert!(decode_id_set("").is_empty());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_record_id();
        let b = generate_record_id();
        assert_ne!(a, b);
        assert!(!a.contains(','));
    }
}
