//! Performance benchmarks for vault-relay
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use vault_relay::provider::memory::{MemoryBus, MemoryWarehouse};
use vault_relay::{
    capture, BusMessage, KafkaTriggerEvent, KafkaTriggerRecord, PersistStage, Publisher,
    RawChangeEvent, RetryPolicy, TokenizedRecord, TransformPolicy, WarehouseSink,
};

fn change_events(count: usize) -> Vec<RawChangeEvent> {
    (0..count)
        .map(|i| {
            let name = if i % 4 == 3 { "MODIFY" } else { "INSERT" };
            serde_json::from_value(serde_json::json!({
                "eventID": i.to_string(),
                "eventName": name,
                "dynamodb": { "NewImage": {
                    "name": { "S": format!("Person {}", i) },
                    "street_address": { "S": "1 Main St" },
                    "city": { "S": "Springfield" },
                    "state": { "S": "IL" },
                    "zip_code": { "S": "62701" }
                }}
            }))
            .unwrap()
        })
        .collect()
}

fn tokenized(count: usize) -> Vec<TokenizedRecord> {
    (0..count)
        .map(|i| TokenizedRecord {
            skyflow_id: format!("id-{:06}", i),
            name: Some(format!("tok-name-{}", i)),
            street_address: Some(format!("tok-street-{}", i)),
            city: Some(format!("tok-city-{}", i)),
            state: Some(format!("tok-state-{}", i)),
            zip_code: Some(format!("tok-zip-{}", i)),
        })
        .collect()
}

fn bench_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture");
    for count in [10, 100, 1000] {
        let events = change_events(count);
        group.bench_function(format!("{} events", count), |b| {
            b.iter(|| capture(&events, TransformPolicy::Abort).unwrap());
        });
    }
    group.finish();
}

fn bench_message_codec(c: &mut Criterion) {
    let record = tokenized(1).remove(0);
    c.bench_function("BusMessage encode", |b| {
        b.iter(|| BusMessage::from_record(&record).unwrap());
    });

    let message = BusMessage::from_record(&record).unwrap();
    c.bench_function("BusMessage decode", |b| {
        b.iter(|| message.decode().unwrap());
    });

    let trigger = KafkaTriggerRecord::encode("persons", 0, 0, &message.payload);
    c.bench_function("KafkaTriggerRecord decode_row", |b| {
        b.iter(|| trigger.decode_row().unwrap());
    });
}

fn bench_memory_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let records = tokenized(100);

    c.bench_function("publish 100 records (memory)", |b| {
        b.to_async(&rt).iter(|| async {
            let publisher = Publisher::new(Arc::new(MemoryBus::new())).with_retry(RetryPolicy {
                max_attempts: 1,
                backoff: Duration::ZERO,
            });
            publisher.publish("persons", &records).await
        });
    });
}

fn bench_memory_persist(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut event = KafkaTriggerEvent::default();
    let records = tokenized(100)
        .iter()
        .enumerate()
        .map(|(offset, record)| {
            let message = BusMessage::from_record(record).unwrap();
            KafkaTriggerRecord::encode("persons", 0, offset as i64, &message.payload)
        })
        .collect();
    event.records.insert("persons-0".to_string(), records);

    c.bench_function("persist 100 rows (memory)", |b| {
        b.to_async(&rt).iter(|| async {
            let stage = PersistStage::new(WarehouseSink::new(Arc::new(MemoryWarehouse::new())));
            stage.handle(&event).await.unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_capture,
    bench_message_codec,
    bench_memory_publish,
    bench_memory_persist,
);
criterion_main!(benches);
