use core::time::Duration;
use std::sync::Arc;

use lease_lock::{directory::LockName, etcd::EtcdLeaseBackend, guard::ExclusionGuard};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backend = EtcdLeaseBackend::connect(["http://localhost:2379"])
        .await
        .expect("failed to connect to etcd");
    let guard = ExclusionGuard::new(Arc::new(backend));
    let name = LockName::derive("example.Worker.Run", None);

    // Run the same binary in two terminals to watch them take turns.
    guard
        .with_exclusive_access(&name, &CancellationToken::new(), || async {
            println!("entered the critical section, sleeping for 10 seconds...");
            for i in 1..=10 {
                println!("{i}...");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok::<_, std::convert::Infallible>(())
        })
        .await
        .expect("guarded call failed");

    println!("Finished!");
}
