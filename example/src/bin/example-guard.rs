use core::time::Duration;
use std::sync::Arc;

use lease_lock::{directory::LockName, guard::ExclusionGuard, memory::MemoryLeaseBackend};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backend = Arc::new(MemoryLeaseBackend::new());
    let name = LockName::derive("example.Worker.Run", None);

    let mut handles = Vec::new();
    for task in 0..3 {
        let guard = ExclusionGuard::new(Arc::clone(&backend));
        let name = name.clone();
        handles.push(tokio::spawn(async move {
            guard
                .with_exclusive_access(&name, &CancellationToken::new(), || async move {
                    println!("task {task} entered the critical section");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    println!("task {task} leaving");
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
                .expect("guarded call failed");
        }));
    }

    for handle in handles {
        handle.await.expect("task failed");
    }
    println!("Finished!");
}
