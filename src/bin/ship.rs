use std::path::PathBuf;

use anyhow::Result;
use clap::{App, Arg};
use ship::Config;
use tracing::info;

fn main() -> Result<()> {
    let matches = App::new("ship")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds Debian and RPM packages from a manifest")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("The config file to read")
                .takes_value(true)
                .default_value("ship.json"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Where to write the packages")
                .takes_value(true)
                .default_value("."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log more; repeat for more detail")
                .multiple_occurrences(true),
        )
        .arg(
            Arg::new("package")
                .value_name("PACKAGE")
                .help("Packages to build; all of them by default")
                .multiple_values(true),
        )
        .get_matches();

    init_tracing(matches.occurrences_of("verbose"));

    let config_path = PathBuf::from(matches.value_of("config").unwrap_or("ship.json"));
    let output_dir = PathBuf::from(matches.value_of("output-dir").unwrap_or("."));
    let names: Vec<String> = matches
        .values_of("package")
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default();

    let mut config = Config::load(&config_path)?;
    config.verify()?;
    for artifact in config.build(&names, &output_dir)? {
        info!("wrote {}", artifact.display());
    }
    Ok(())
}

fn init_tracing(verbose: u64) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(format!("ship={}", level))
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
