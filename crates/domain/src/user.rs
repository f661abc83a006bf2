use serde::{Deserialize, Serialize};

/// 用户角色，封闭集合。
///
/// `Parent` 是非特权角色（咨询发起方），`Staff` 覆盖所有特权角色
/// （管理员、治疗师、内容管理员），由用户目录在查询时归并。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Parent,
    Staff,
}

impl UserRole {
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Staff)
    }
}
