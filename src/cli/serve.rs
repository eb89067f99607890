use anyhow::Context;

use crate::server;
use crate::settings::{load_settings, shellexpand_path};

pub struct ServeArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub watch_folder: Option<String>,
    pub static_dir: Option<String>,
    pub auth: bool,
}

pub fn run(args: ServeArgs) -> anyhow::Result<()> {
    let mut settings = load_settings();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(folder) = args.watch_folder {
        settings.watch_folder = shellexpand_path(&folder);
    }
    if let Some(dir) = args.static_dir {
        settings.static_dir = Some(shellexpand_path(&dir));
    }
    settings.auth_enabled |= args.auth;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(server::serve(settings))
}
