//! 加解密与脱敏基准测试
//! 使用criterion进行性能测试

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use trustcore::{
    domain::StructuredValue,
    infrastructure::{
        encryption::{EncryptionKey, Keyring},
        log_sanitizer::{sanitize_string, sanitize_value},
    },
    service::EncryptionManager,
};

fn manager() -> EncryptionManager {
    let keyring = Keyring::new("v1", EncryptionKey::generate()).expect("valid keyring");
    EncryptionManager::new(keyring, 64 * 1024)
}

fn bench_encryption(c: &mut Criterion) {
    let m = manager();
    let email = "jane.doe@example.com";
    let encrypted = m.encrypt(email).expect("encrypt");

    c.bench_function("encrypt_email", |b| b.iter(|| m.encrypt_email(black_box(email))));
    c.bench_function("decrypt_email", |b| b.iter(|| m.decrypt(black_box(&encrypted))));

    let address = "1600 Amphitheatre Parkway, Mountain View, CA 94043 ".repeat(8);
    c.bench_function("encrypt_decrypt_address", |b| {
        b.iter(|| {
            let value = m.encrypt(black_box(&address)).expect("encrypt");
            m.decrypt(&value)
        })
    });
}

fn bench_redaction(c: &mut Criterion) {
    let payload = StructuredValue::from(json!({
        "user": { "name": "John", "password": "secret", "email": "john@example.com" },
        "request": {
            "headers": { "authorization": "Bearer abc.def.ghi", "accept": "application/json" },
            "query": "page=2&token=abcdef"
        },
        "items": [ { "id": 1, "api_key": "k" }, { "id": 2, "note": "password=hunter2" } ]
    }));

    c.bench_function("sanitize_nested_value", |b| b.iter(|| sanitize_value(black_box(&payload))));
    c.bench_function("sanitize_free_text", |b| {
        b.iter(|| sanitize_string(black_box("login failed for token=abc123; Authorization: Bearer xyz")))
    });
}

criterion_group!(benches, bench_encryption, bench_redaction);
criterion_main!(benches);
