use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};
use hostpool::{BoxError, Connection, ConnectionFactory, HostPool, HostPoolConfig, ServingOrder};

struct BenchConnection;

impl Connection for BenchConnection {}

struct BenchFactory;

impl ConnectionFactory for BenchFactory {
    type Connection = BenchConnection;

    fn create(&self) -> Result<BenchConnection, BoxError> {
        Ok(BenchConnection)
    }

    fn destroy(&self, _conn: &BenchConnection) -> Result<(), BoxError> {
        Ok(())
    }
}

fn pool(order: ServingOrder) -> HostPool<BenchFactory> {
    let config = HostPoolConfig::new("127.0.0.1", 9160)
        .with_max_active(16)
        .with_serving_order(order)
        .without_eviction();
    match HostPool::new(config, BenchFactory) {
        Ok(pool) => pool,
        Err(err) => panic!("unable to build pool: {}", err),
    }
}

fn borrow_release(c: &mut Criterion) {
    for order in [ServingOrder::Lifo, ServingOrder::Fifo] {
        let pool = pool(order);
        c.bench_function(&format!("borrow_release_{:?}", order).to_lowercase(), |b| {
            b.iter(|| {
                let conn = pool.borrow().unwrap();
                pool.release(&conn);
            })
        });
    }
}

fn contended_borrow_release(c: &mut Criterion) {
    let pool = Arc::new(pool(ServingOrder::Lifo));
    c.bench_function("contended_borrow_release_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let conn = pool.borrow().unwrap();
                            pool.release(&conn);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        })
    });
}

criterion_group!(benches, borrow_release, contended_borrow_release);
criterion_main!(benches);
