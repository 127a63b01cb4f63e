//! Service startup helpers shared by nibesrv binaries

use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name, also the default log target (e.g. "nibesrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info; pass `env!("CARGO_PKG_VERSION")` of the binary crate
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ███╗   ██╗██╗██████╗ ███████╗███████╗██████╗ ██╗   ██╗
 ████╗  ██║██║██╔══██╗██╔════╝██╔════╝██╔══██╗██║   ██║
 ██╔██╗ ██║██║██████╔╝█████╗  ███████╗██████╔╝██║   ██║
 ██║╚██╗██║██║██╔══██╗██╔══╝  ╚════██║██╔══██╗╚██╗ ██╔╝
 ██║ ╚████║██║██████╔╝███████╗███████║██║  ██║ ╚████╔╝
 ╚═╝  ╚═══╝╚═╝╚═════╝ ╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
"#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
}
