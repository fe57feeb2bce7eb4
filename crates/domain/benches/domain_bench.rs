use std::sync::Arc;

use common::{Identity, Version};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, DomainEvent, Money, Order, OrderService, Repository, Session, order};
use event_store::InMemoryEventStore;

/// Order history with one line per event after the placement.
fn order_history(lines: usize) -> (Identity, Vec<DomainEvent>) {
    let processors = Arc::new(order::processors().unwrap());
    let id = Identity::new();
    let mut aggregate = Aggregate::with_root(processors, Order::empty(id)).unwrap();

    let placed = aggregate.root::<Order>().unwrap().place("bench").unwrap();
    aggregate.apply(DomainEvent::new(id, placed)).unwrap();
    for i in 0..lines {
        let added = aggregate
            .root::<Order>()
            .unwrap()
            .add_line(format!("SKU-{i}").as_str().into(), 1, Money::from_cents(100))
            .unwrap();
        aggregate.apply(DomainEvent::new(id, added)).unwrap();
    }
    (id, aggregate.uncommitted_changes().to_vec())
}

fn bench_place_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryEventStore::new()).unwrap();

    c.bench_function("domain/place_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                service.place_order("bench").await.unwrap();
            });
        });
    });
}

fn bench_add_line(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryEventStore::new()).unwrap();
    let order_id = rt.block_on(async { service.place_order("bench").await.unwrap() });

    c.bench_function("domain/add_line", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .add_line(order_id, "SKU-BENCH", 1, Money::from_cents(1000))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_replay_in_memory(c: &mut Criterion) {
    let processors = Arc::new(order::processors().unwrap());
    let (id, history) = order_history(100);

    c.bench_function("domain/replay_101_events", |b| {
        b.iter(|| {
            let mut aggregate = Aggregate::with_root(processors.clone(), Order::empty(id)).unwrap();
            aggregate
                .load_from_history(history.iter().cloned(), Version::new(1))
                .unwrap();
        });
    });
}

fn bench_find_from_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repo = Repository::new(
        InMemoryEventStore::new(),
        Arc::new(order::processors().unwrap()),
        Arc::new(order::serializer()),
    );
    let (id, _) = order_history(0);
    rt.block_on(async {
        let mut aggregate = repo.create(Order::empty(id)).unwrap();
        let placed = aggregate.root::<Order>().unwrap().place("bench").unwrap();
        aggregate.apply(DomainEvent::new(id, placed)).unwrap();
        let mut session = Session::new();
        repo.add(&mut session, aggregate).unwrap();
        repo.commit_changes(&mut session).await.unwrap();

        for i in 0..50 {
            let mut session = Session::new();
            let aggregate = repo.find::<Order>(&mut session, id).await.unwrap();
            let added = aggregate
                .root::<Order>()
                .unwrap()
                .add_line(format!("SKU-{i}").as_str().into(), 1, Money::from_cents(100))
                .unwrap();
            aggregate.apply(DomainEvent::new(id, added)).unwrap();
            repo.commit_changes(&mut session).await.unwrap();
        }
    });

    c.bench_function("domain/find_51_batches", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut session = Session::new();
                repo.find::<Order>(&mut session, id).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_place_order,
    bench_add_line,
    bench_replay_in_memory,
    bench_find_from_store,
);
criterion_main!(benches);
