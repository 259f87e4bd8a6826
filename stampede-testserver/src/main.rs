use std::net::SocketAddr;

use tokio::net::TcpListener;

use stampede_testserver::{TargetConfig, TestServerStats};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut config = TargetConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:0")
                })?;
                bind_addr = addr.parse()?;
            }
            "--coupon-stock" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--coupon-stock requires a number"))?;
                config.coupon_stock = n.parse()?;
            }
            "--product-stock" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--product-stock requires a number"))?;
                config.product_stock = n.parse()?;
            }
            "-h" | "--help" => {
                eprintln!(
                    "stampede-testserver\n\nUSAGE:\n  stampede-testserver [--bind 127.0.0.1:0] [--coupon-stock 500] [--product-stock 1000]\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready."
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

    let stats = TestServerStats::default();
    let app = stampede_testserver::router(config, stats);

    println!("HTTP_URL=http://{addr}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
    });

    serve.await?;
    Ok(())
}
