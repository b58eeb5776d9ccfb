//! 唯一标识符生成.

use crate::consts::uids::UUID_ROOT;

/// 生成一个新的 `2.25.<128 位随机整数>` 形式的 UID.
///
/// 长度不超过 44 个字符, 满足 UID 64 字符的上限.
pub fn fresh() -> String {
    format!("{UUID_ROOT}.{}", rand::random::<u128>())
}
