//! 结构化值
//!
//! 审计元数据、请求/响应快照、字段前后值统一使用该类型，
//! 脱敏与序列化都在此类型上穷尽匹配，不做运行时类型断言。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// 审计元数据（键有序，序列化结果稳定）
pub type Metadata = BTreeMap<String, StructuredValue>;

/// 结构化值：null | bool | number | string | list | map
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum StructuredValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<StructuredValue>),
    Map(Metadata),
}

impl StructuredValue {
    /// 从键值对构造 Map
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<StructuredValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Map 取值；非 Map 返回 None
    pub fn get(&self, key: &str) -> Option<&StructuredValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for StructuredValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<StructuredValue> for Value {
    fn from(value: StructuredValue) -> Self {
        match value {
            StructuredValue::Null => Value::Null,
            StructuredValue::Bool(b) => Value::Bool(b),
            StructuredValue::Number(n) => Value::Number(n),
            StructuredValue::String(s) => Value::String(s),
            StructuredValue::List(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            StructuredValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for StructuredValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for StructuredValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for StructuredValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for StructuredValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for StructuredValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u32> for StructuredValue {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for StructuredValue {
    /// NaN / Infinity 无法用 JSON 表示，转为 Null
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Self::Number).unwrap_or(Self::Null)
    }
}

impl<T: Into<StructuredValue>> From<Vec<T>> for StructuredValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Metadata> for StructuredValue {
    fn from(map: Metadata) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<StructuredValue>> From<Option<T>> for StructuredValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// 从键值对构造元数据
pub fn metadata<K, V, I>(entries: I) -> Metadata
where
    K: Into<String>,
    V: Into<StructuredValue>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
