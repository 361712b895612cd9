use std::env;
use std::fs::create_dir_all;
use std::io;
use std::path::Path;

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_history_grid::config::UserConfig;
use osm_history_grid::errors::Result;
use osm_history_grid::etl::build_grid::BuildGridEtl;
use osm_history_grid::etl::parse_history::ParseHistoryEtl;
use osm_history_grid::etl::Etl;

const DEFAULT_CONFIG_PATH: &str = "config/history.json";

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!(config_path = config_path.as_str(); "Loading config");
    let user_config = UserConfig::load(Path::new(&config_path))?;

    let output_dir = user_config.output_dir();
    create_dir_all(&output_dir)?;

    ParseHistoryEtl::new(&user_config).process(&output_dir)?;
    BuildGridEtl::new(&user_config).process(&output_dir)?;
    Ok(())
}
