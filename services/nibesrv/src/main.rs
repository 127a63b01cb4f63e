//! NIBE Gateway Service (nibesrv)

use clap::Parser;
use tracing::{error, info};

use common::service_bootstrap::ServiceInfo;
use nibesrv::bootstrap::{self, Args, ServiceArgs};
use nibesrv::runtime::start_gateway_service;
use nibesrv::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let service_args: ServiceArgs = args.clone().into();

    let service_info = ServiceInfo::new(
        "nibesrv",
        env!("CARGO_PKG_VERSION"),
        "NIBE MODBUS40 accessory gateway (UDP relay <-> MQTT)",
    );

    // Configuration first: it decides where logs go
    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return Err(e);
        },
    };

    bootstrap::initialize_logging(&service_args, &service_info, &config)?;
    if !service_args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }
    bootstrap::log_configuration(&config);

    if service_args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let cancel = common::shutdown::shutdown_token();
    if let Err(e) = start_gateway_service(config, cancel).await {
        error!("Service error: {}", e);
        return Err(e);
    }

    info!("Service shutdown complete");
    Ok(())
}
