use std::net::SocketAddr;

use tokio::net::TcpListener;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:22555".parse()?;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:22555")
                })?;
                bind_addr = addr.parse()?;
            }
            "-h" | "--help" => {
                eprintln!(
                    "barrage-testserver\n\nUSAGE:\n  barrage-testserver [--bind 127.0.0.1:22555]\n\nOUTPUT:\n  Prints BASE_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = barrage_testserver::router(barrage_testserver::TestServerStats::default());

    println!("BASE_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
