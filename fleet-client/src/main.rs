use fleet_client::run_cli;
use fleet_client::util::shutdown::SHUTDOWN;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            SHUTDOWN.cancel();
        }
    });

    run_cli().await
}
