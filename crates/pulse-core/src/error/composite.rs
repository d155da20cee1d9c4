use std::fmt;

use super::FlowError;

/// 复合错误：多个并发上游失败的有序聚合。
///
/// # 设计背景（Why）
/// - `combine_latest` 开启 `delay_error` 后，N 个源可能各自失败；丢弃任何
///   一个都会让排障缺少现场，因此以单一错误承载全部成因。
/// - 原型系统按引用同一性去重；Rust 侧错误是值语义，改用
///   `(分类, 渲染消息)` 作为插入唯一键，观测行为一致。
///
/// # 契约说明（What）
/// - 迭代顺序即插入顺序；
/// - [`suppress`](Self::suppress) 追加新成因，重复键被忽略；
/// - 因果链遍历设有访问上限：所有权模型下错误树不可能成环，上限仅用来
///   保持与原型"防环遍历"相同的可观测行为。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeError {
    errors: Vec<FlowError>,
}

/// 因果链遍历的最大深度，命中即停（对应原型的"revisit 即停"守卫）。
const CAUSE_CHAIN_LIMIT: usize = 64;

impl CompositeError {
    /// 从一组错误构造复合错误，按插入顺序去重。
    ///
    /// # 契约说明（What）
    /// - **输入**：任意可迭代的错误集合；空集合也被接受，此时复合错误
    ///   退化为"无成因"形态，调用方通常不应投递它；
    /// - **后置条件**：`errors()` 保序且键唯一。
    pub fn new(errors: impl IntoIterator<Item = FlowError>) -> Self {
        let mut composite = CompositeError { errors: Vec::new() };
        for error in errors {
            composite.suppress(error);
        }
        composite
    }

    /// 追加一个成因；键重复时忽略。
    pub fn suppress(&mut self, error: FlowError) {
        let key = Self::dedup_key(&error);
        if self.errors.iter().any(|e| Self::dedup_key(e) == key) {
            return;
        }
        self.errors.push(error);
    }

    /// 全部成因，保插入序。
    pub fn errors(&self) -> &[FlowError] {
        &self.errors
    }

    /// 成因数量。
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// 是否不含任何成因。
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// 展开因果链：逐层进入嵌套的复合成员，深度受 [`CAUSE_CHAIN_LIMIT`] 约束。
    pub fn cause_chain(&self) -> Vec<&FlowError> {
        let mut chain = Vec::new();
        let mut frontier: Vec<&FlowError> = self.errors.iter().collect();
        while let Some(error) = frontier.pop() {
            if chain.len() >= CAUSE_CHAIN_LIMIT {
                break;
            }
            chain.push(error);
            if let FlowError::Composite(inner) = error {
                frontier.extend(inner.errors.iter());
            }
        }
        chain
    }

    fn dedup_key(error: &FlowError) -> (super::FlowErrorKind, String) {
        (error.kind(), error.to_string())
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} multiple errors occurred:", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            writeln!(f, "  [{index}] {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}

impl From<CompositeError> for FlowError {
    fn from(value: CompositeError) -> Self {
        FlowError::Composite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppress_preserves_order_and_dedups() {
        let mut composite = CompositeError::new([
            FlowError::user_function("boom"),
            FlowError::timeout_signalled("first"),
        ]);
        composite.suppress(FlowError::user_function("boom"));
        assert_eq!(composite.len(), 2, "重复键必须被忽略");
        assert_eq!(
            composite.errors()[0],
            FlowError::user_function("boom"),
            "迭代必须保插入序"
        );
    }
}
