use anyhow::Error;
use clap::Parser;

use netcat_rs::common::setup_tracing;
use netcat_rs::netcat::NetcatArgs;

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    let args = NetcatArgs::parse();
    netcat_rs::netcat::run(args).await?;
    Ok(())
}
