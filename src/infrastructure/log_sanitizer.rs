// 日志脱敏模块 - 审计数据落库/展示前的敏感信息清理
//
// 三层规则按顺序执行：
// 1. 敏感键名：整值替换
// 2. 字符串中的 `key=` / `token=` / `authorization:` / `bearer ` 等标记：保留标记、替换其后的值
// 3. 疑似令牌的长串：保留前 8 后 4
//
// 所有函数幂等：对已脱敏数据再次执行结果不变。

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

use crate::domain::{Metadata, StructuredValue};

/// 脱敏标记
pub const REDACTED: &str = "[REDACTED]";

const TOKEN_MIN_LEN: usize = 32;
const TOKEN_KEEP_PREFIX: usize = 8;
const TOKEN_KEEP_SUFFIX: usize = 4;

// 敏感字段名（小写精确匹配）
static SENSITIVE_KEYS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "password",
        "password_hash",
        "new_password",
        "old_password",
        "current_password",
        "confirm_password",
        "ssn",
        "social_security",
        "credit_card",
        "card_number",
        "cvv",
        "cvc",
        "bank_account",
        "routing_number",
        "account_number",
        "api_key",
        "api_secret",
        "secret",
        "secret_key",
        "access_token",
        "refresh_token",
        "token",
        "authorization",
        "bearer",
        "jwt",
        "private_key",
        "encryption_key",
        "session_id",
        "cookie",
        "auth",
    ]
    .into_iter()
    .collect()
});

// key=value 形式，值截止到空白或分隔符
static ASSIGNMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password=|token=|key=|secret=)[^\s&;,]*").expect("valid assignment regex")
});

// Authorization 头：其后整行都是凭据
static AUTH_HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(authorization:[ \t]*)[^\r\n]*").expect("valid authorization regex")
});

static BEARER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(bearer\s+)\S+").expect("valid bearer regex"));

/// 键名是否敏感（大小写不敏感）
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.contains(key.to_lowercase().as_str())
}

/// 脱敏任意结构化值（递归）
pub fn sanitize_value(value: &StructuredValue) -> StructuredValue {
    match value {
        StructuredValue::Map(map) => StructuredValue::Map(sanitize_map(map)),
        StructuredValue::List(items) => {
            StructuredValue::List(items.iter().map(sanitize_value).collect())
        }
        StructuredValue::String(s) => StructuredValue::String(sanitize_string(s)),
        other => other.clone(),
    }
}

/// 脱敏映射：敏感键整值替换，其余递归
pub fn sanitize_map(map: &Metadata) -> Metadata {
    map.iter()
        .map(|(key, value)| {
            let sanitized = if is_sensitive_key(key) {
                StructuredValue::String(REDACTED.to_string())
            } else {
                sanitize_value(value)
            };
            (key.clone(), sanitized)
        })
        .collect()
}

/// 仅按键名脱敏（不改写普通字符串）
pub fn redact_sensitive_keys(map: &Metadata) -> Metadata {
    map.iter()
        .map(|(key, value)| {
            let redacted = if is_sensitive_key(key) {
                StructuredValue::String(REDACTED.to_string())
            } else {
                redact_keys_in_value(value)
            };
            (key.clone(), redacted)
        })
        .collect()
}

/// 结构化值按键名脱敏
pub fn redact_keys_in_value(value: &StructuredValue) -> StructuredValue {
    match value {
        StructuredValue::Map(map) => StructuredValue::Map(redact_sensitive_keys(map)),
        StructuredValue::List(items) => {
            StructuredValue::List(items.iter().map(redact_keys_in_value).collect())
        }
        other => other.clone(),
    }
}

/// 脱敏自由文本
pub fn sanitize_string(s: &str) -> String {
    let mut matched = false;
    let mut out = s.to_string();

    for (regex, replacement) in [
        (&*AUTH_HEADER_REGEX, "${1}[REDACTED]"),
        (&*BEARER_REGEX, "${1}[REDACTED]"),
        (&*ASSIGNMENT_REGEX, "${1}[REDACTED]"),
    ] {
        if regex.is_match(&out) {
            matched = true;
            out = regex.replace_all(&out, replacement).into_owned();
        }
    }

    if matched {
        return out;
    }

    if looks_like_token(s) {
        return mask_token(s);
    }

    out
}

/// 长度 > 32 且 90% 以上字符为 [A-Za-z0-9_-]
fn looks_like_token(s: &str) -> bool {
    let total = s.chars().count();
    if total <= TOKEN_MIN_LEN {
        return false;
    }
    let token_chars = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .count();
    token_chars * 10 > total * 9
}

fn mask_token(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let prefix: String = chars[..TOKEN_KEEP_PREFIX].iter().collect();
    let suffix: String = chars[chars.len() - TOKEN_KEEP_SUFFIX..].iter().collect();
    format!("{}...{}...{}", prefix, REDACTED, suffix)
}

/// 脱敏标识（邮箱只显示首字母和域名），用于 tracing 字段
pub fn mask_identifier(identifier: &str) -> String {
    match identifier.find('@') {
        Some(at_pos) => {
            let (local, domain) = identifier.split_at(at_pos);
            match local.chars().next() {
                Some(first) if local.chars().count() > 2 => format!("{}***{}", first, domain),
                _ => format!("**{}", domain),
            }
        }
        None => {
            let count = identifier.chars().count();
            if count <= 4 {
                "***".to_string()
            } else {
                let prefix: String = identifier.chars().take(2).collect();
                format!("{}***", prefix)
            }
        }
    }
}
