//! Basic usage examples for HostPool

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use hostpool::{
    BoxError, Connection, ConnectionFactory, ExhaustionPolicy, HostPool, HostPoolConfig, PoolError,
    ServingOrder,
};

struct Client {
    serial: usize,
    closed: AtomicBool,
}

impl Connection for Client {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn known_hosts(&self) -> HashSet<String> {
        ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .iter()
            .map(|host| host.to_string())
            .collect()
    }
}

#[derive(Default)]
struct ClientFactory {
    created: AtomicUsize,
}

impl ConnectionFactory for ClientFactory {
    type Connection = Client;

    fn create(&self) -> Result<Client, BoxError> {
        let serial = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Client {
            serial,
            closed: AtomicBool::new(false),
        })
    }

    fn destroy(&self, conn: &Client) -> Result<(), BoxError> {
        conn.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

fn main() -> Result<(), BoxError> {
    println!("=== hostpool - Basic Examples ===\n");

    // Example 1: Borrow and release
    borrow_and_release()?;

    // Example 2: Failing fast when saturated
    fail_fast()?;

    // Example 3: Blocking until a connection is handed over
    block_with_timeout()?;

    // Example 4: Metrics and topology
    metrics_and_topology()?;

    Ok(())
}

fn borrow_and_release() -> Result<(), BoxError> {
    println!("1. Borrow and release:");
    let pool = HostPool::new(HostPoolConfig::new("10.0.0.1", 9160), ClientFactory::default())?;

    let conn = pool.borrow()?;
    println!("   Got connection #{}", conn.serial);
    pool.release(&conn);
    pool.release(&conn);

    println!("   Idle after double release: {}", pool.idle_count());
    println!("   Active after double release: {}\n", pool.active_count());
    Ok(())
}

fn fail_fast() -> Result<(), BoxError> {
    println!("2. Fail fast:");
    let config = HostPoolConfig::new("10.0.0.1", 9160)
        .with_max_active(2)
        .with_exhaustion_policy(ExhaustionPolicy::Fail);
    let pool = HostPool::new(config, ClientFactory::default())?;

    let _a = pool.borrow()?;
    let _b = pool.borrow()?;
    match pool.borrow() {
        Err(PoolError::PoolExhausted) => println!("   Third borrow: exhausted"),
        other => println!("   Third borrow: {:?}", other.map(|c| c.id())),
    }
    println!("   Exhausted: {}\n", pool.is_exhausted());
    Ok(())
}

fn block_with_timeout() -> Result<(), BoxError> {
    println!("3. Block with timeout:");
    let config = HostPoolConfig::new("10.0.0.1", 9160)
        .with_max_active(1)
        .with_serving_order(ServingOrder::Fifo)
        .with_max_wait(Duration::from_secs(1));
    let pool = HostPool::new(config, ClientFactory::default())?;

    let held = pool.borrow()?;
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.borrow().map(|conn| conn.serial))
    };

    thread::sleep(Duration::from_millis(100));
    println!("   Blocked threads: {}", pool.blocked_count());
    pool.release(&held);

    match waiter.join() {
        Ok(Ok(serial)) => println!("   Waiter received connection #{}\n", serial),
        Ok(Err(err)) => println!("   Waiter failed: {}\n", err),
        Err(_) => println!("   Waiter panicked\n"),
    }
    Ok(())
}

fn metrics_and_topology() -> Result<(), BoxError> {
    println!("4. Metrics and topology:");
    let pool = HostPool::new(HostPoolConfig::new("10.0.0.1", 9160), ClientFactory::default())?;

    {
        let _a = pool.lease()?;
        let _b = pool.lease()?;
        println!("   Known hosts: {}", pool.refresh_known_hosts()?.len());
    }

    println!("   Invalidated: {}", pool.invalidate_all());

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    let mut keys: Vec<_> = metrics.keys().collect();
    keys.sort();
    for key in keys {
        println!("     {}: {}", key, metrics[key]);
    }
    pool.close();
    Ok(())
}
