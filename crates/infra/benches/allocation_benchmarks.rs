use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use creditforge_catalog::{CatalogBuilder, Cost, OperationParams};
use creditforge_core::{EngineConfig, OwnerRef, TransactionId, WalletId};
use creditforge_events::InMemoryEventBus;
use creditforge_infra::{CreditEngine, CreditStore, GiveCredits, InMemoryCreditStore, SpendCredits};
use creditforge_ledger::{CreditEvent, GrantBucket, LedgerView, plan_allocations};

type Engine = CreditEngine<InMemoryCreditStore, Arc<InMemoryEventBus<CreditEvent>>>;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn engine() -> Engine {
    let config = EngineConfig::default();
    let catalog = CatalogBuilder::new()
        .operation("ping", |o| {
            o.costs(Cost::fixed(1));
        })
        .build(&config)
        .unwrap();
    CreditEngine::new(InMemoryCreditStore::new(), catalog, config, Arc::new(InMemoryEventBus::new()))
}

/// Wallet with `grants` expiring grants of 10 credits each.
fn funded_wallet(engine: &Engine, grants: usize) -> WalletId {
    let wallets = engine.wallets();
    let wallet = wallets
        .wallet_for_owner(&OwnerRef::new("user", "bench"), now())
        .unwrap();
    for i in 0..grants {
        let expires = now() + Duration::days(30 + i as i64);
        wallets
            .give_credits(wallet.id, GiveCredits::new(10, "bench", now()).expiring_at(expires))
            .unwrap();
    }
    wallet.id
}

fn buckets(count: usize) -> Vec<GrantBucket> {
    (0..count)
        .map(|i| GrantBucket {
            transaction_id: TransactionId::new(),
            sequence: i as u64,
            expires_at: (i % 3 != 0).then(|| now() + Duration::days(i as i64)),
            remaining: 10,
        })
        .collect()
}

fn bench_fifo_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_planning");

    for count in [10usize, 100, 1_000].iter() {
        let grants = buckets(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("drain_half", count), count, |b, &count| {
            let amount = (count as i64 * 10) / 2;
            b.iter(|| black_box(plan_allocations(black_box(&grants), amount).unwrap()));
        });
    }

    group.finish();
}

fn bench_balance_computation(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_computation");

    for grants in [10usize, 100, 1_000].iter() {
        let engine = engine();
        let wallet = funded_wallet(&engine, *grants);
        for _ in 0..*grants {
            engine
                .wallets()
                .spend_credits_on(wallet, SpendCredits::new("ping", OperationParams::new(), now()))
                .unwrap();
        }
        let transactions = engine.store().transactions(wallet).unwrap();
        let allocations = engine.store().allocations(wallet).unwrap();

        group.bench_with_input(BenchmarkId::new("ledger_view", grants), grants, |b, _| {
            b.iter(|| {
                let view = LedgerView::new(&transactions, &allocations);
                black_box(view.balance(now(), false))
            });
        });
    }

    group.finish();
}

fn bench_spend_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("spend_latency");
    group.sample_size(200);

    for grants in [10usize, 500].iter() {
        group.bench_with_input(BenchmarkId::new("spend_one_credit", grants), grants, |b, &grants| {
            let engine = engine();
            let wallet = funded_wallet(&engine, grants);
            b.iter(|| {
                let wallets = engine.wallets();
                if wallets.balance(wallet, now()).unwrap() == 0 {
                    wallets
                        .give_credits(wallet, GiveCredits::new(10 * grants as i64, "refill", now()))
                        .unwrap();
                }
                black_box(
                    wallets
                        .spend_credits_on(wallet, SpendCredits::new("ping", OperationParams::new(), now()))
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fifo_planning,
    bench_balance_computation,
    bench_spend_latency
);
criterion_main!(benches);
