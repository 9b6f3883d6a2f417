use std::sync::Arc;

use whatsam_worker::wa::StubWaSocketFactory;

#[tokio::main]
async fn main() {
    if let Err(error) = whatsam_worker::run(Arc::new(StubWaSocketFactory)).await {
        eprintln!("fatal: {error:#}");
        std::process::exit(1);
    }
}
