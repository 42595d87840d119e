use std::collections::BTreeMap;
use std::fmt;

/// 规范化的指标键：名称 + 按键名排序的标签集
///
/// 标签内容相同的两个集合，无论插入顺序如何，都会得到同一个键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn from_map(name: &str, labels: &BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// 派生一个同标签、不同名称的键（计时器写入 `<name>_duration_ms` 时使用）
    pub fn with_name(&self, name: String) -> Self {
        Self {
            name,
            labels: self.labels.clone(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        let pairs = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", pairs.join(","))
    }
}
