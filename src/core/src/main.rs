use clap::Parser;
use leurre::configuration::config::{Args, Config};
use leurre::controller::controller_handler::Controller;
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
██╗     ███████╗██╗   ██╗██████╗ ██████╗ ███████╗
██║     ██╔════╝██║   ██║██╔══██╗██╔══██╗██╔════╝
██║     █████╗  ██║   ██║██████╔╝██████╔╝█████╗
██║     ██╔══╝  ██║   ██║██╔══██╗██╔══██╗██╔══╝
███████╗███████╗╚██████╔╝██║  ██║██║  ██║███████╗
╚══════╝╚══════╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝
=================================================
   A low-interaction HTTP and SSH honeypot v{}
=================================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();

    info!("Importing configuration");
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration imported: http={}, ssh={}, database={}, collector={}",
        config.http_addr,
        config.ssh_addr,
        config.database_path.display(),
        config.collector_url
    );

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to start: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Stopped");
}
