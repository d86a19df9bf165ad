// hostpool - per-host connection pool
// Quick demo against an in-memory connection factory.
// Run examples with: cargo run --example basic

use std::sync::atomic::{AtomicUsize, Ordering};

use hostpool::{BoxError, Connection, ConnectionFactory, HostPool, HostPoolConfig};
use tracing_subscriber::EnvFilter;

struct DemoConnection {
    serial: usize,
}

impl Connection for DemoConnection {}

#[derive(Default)]
struct DemoFactory {
    created: AtomicUsize,
}

impl ConnectionFactory for DemoFactory {
    type Connection = DemoConnection;

    fn create(&self) -> Result<DemoConnection, BoxError> {
        let serial = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(DemoConnection { serial })
    }

    fn destroy(&self, _conn: &DemoConnection) -> Result<(), BoxError> {
        Ok(())
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hostpool=debug")),
        )
        .init();

    println!("=== hostpool ===");
    println!("See demos/ for more usage");
    println!();

    let pool = HostPool::new(HostPoolConfig::new("127.0.0.1", 9160), DemoFactory::default())?;

    {
        let conn = pool.lease()?;
        println!("  Got connection #{}", conn.serial);
    }

    println!("  Idle after return: {}", pool.idle_count());
    println!("  {}", pool.debug_string());
    pool.close();
    Ok(())
}
