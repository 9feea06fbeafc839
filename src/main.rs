use std::path::PathBuf;
use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use lakemaps::overpass::DEFAULT_ENDPOINT;
use lakemaps::tiles::HttpTileProvider;
use lakemaps::{run, CredentialResolver, FallbackResolver, OutputFormat, OverpassSource, PromptResolver, RunConfig};

fn cli() -> Command {
    Command::new("lakemaps")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Render printable lake and park maps from OpenStreetMap data")
        .arg(Arg::new("places")
                 .long("places")
                 .short('p')
                 .value_name("FILE")
                 .default_value("nation_lakes.json")
                 .value_parser(value_parser!(PathBuf))
                 .help("JSON file listing places (name, west, east, south, north)"))
        .arg(Arg::new("tags")
                 .long("tags")
                 .value_name("FILE")
                 .default_value("tags_osm.json")
                 .value_parser(value_parser!(PathBuf))
                 .help("JSON file with the OSM tags to fetch"))
        .arg(Arg::new("styles")
                 .long("styles")
                 .value_name("FILE")
                 .default_value("tag_styles.json")
                 .value_parser(value_parser!(PathBuf))
                 .help("JSON file mapping tags to styles"))
        .arg(Arg::new("tiles")
                 .long("tiles")
                 .short('t')
                 .value_name("FILE")
                 .default_value("tiles.json")
                 .value_parser(value_parser!(PathBuf))
                 .help("JSON file with background tile URLs"))
        .arg(Arg::new("background")
                 .long("background")
                 .visible_alias("bg")
                 .short('b')
                 .value_name("NAME")
                 .default_value("StamenTonerLite")
                 .help("Background tiles, e.g. StamenToner, StamenTonerLite, StamenTerrain, \
                        StamenWatercolor, GoogleMaps, GoogleSatellite, GoogleSatelliteHybrid, EsriSatellite"))
        .arg(Arg::new("dim")
                 .long("dim")
                 .value_name("INCHES")
                 .default_value("10")
                 .value_parser(value_parser!(f64))
                 .help("Longest side of the printed map, in inches"))
        .arg(Arg::new("dpi")
                 .long("dpi")
                 .default_value("300")
                 .value_parser(value_parser!(f64))
                 .help("Output resolution"))
        .arg(Arg::new("output-dir")
                 .long("output-dir")
                 .short('o')
                 .value_name("DIR")
                 .default_value("maps")
                 .value_parser(value_parser!(PathBuf))
                 .help("Directory the maps are written to"))
        .arg(Arg::new("format")
                 .long("format")
                 .default_value("png")
                 .value_parser(|s: &str| s.parse::<OutputFormat>())
                 .help("Output format: png or svg"))
        .arg(Arg::new("jobs")
                 .long("jobs")
                 .short('j')
                 .default_value("1")
                 .value_parser(value_parser!(u64).range(1..))
                 .help("Number of places rendered in parallel"))
        .arg(Arg::new("timeout-secs")
                 .long("timeout-secs")
                 .default_value("180")
                 .value_parser(value_parser!(u64).range(1..))
                 .help("Network timeout for feature and tile requests"))
        .arg(Arg::new("overpass-url")
                 .long("overpass-url")
                 .value_name("URL")
                 .default_value(DEFAULT_ENDPOINT)
                 .help("Overpass API endpoint"))
        .arg(Arg::new("interactive")
                 .long("interactive")
                 .action(ArgAction::SetTrue)
                 .help("Ask for another background when a tile API key is missing"))
        .arg(Arg::new("log-level")
                 .long("log-level")
                 .default_value("info")
                 .help("trace, debug, info, warn or error"))
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> T {
    matches
        .get_one::<T>(id)
        .cloned()
        .expect("argument has a default value")
}

fn run_config(matches: &ArgMatches) -> Result<RunConfig, String> {
    let max_dim: f64 = required(matches, "dim");
    let dpi: f64 = required(matches, "dpi");
    if !(max_dim > 0.0) {
        return Err(format!("--dim must be positive, got {}", max_dim));
    }
    if !(dpi > 0.0) {
        return Err(format!("--dpi must be positive, got {}", dpi));
    }
    Ok(RunConfig {
        places_path: required(matches, "places"),
        tags_path: required(matches, "tags"),
        styles_path: required(matches, "styles"),
        tiles_path: required(matches, "tiles"),
        background: required(matches, "background"),
        max_dim,
        dpi,
        output_dir: required(matches, "output-dir"),
        format: required(matches, "format"),
        jobs: required::<u64>(matches, "jobs") as usize,
        timeout_secs: required(matches, "timeout-secs"),
        interactive: matches.get_flag("interactive"),
    })
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to initialise logging: {}", err);
    }
}

fn main() {
    let matches = cli().get_matches();
    init_logging(&required::<String>(&matches, "log-level"));

    let config = run_config(&matches).unwrap_or_else(|err| {
        eprintln!("{}", err);
        std::process::exit(2)
    });
    let timeout = Duration::from_secs(config.timeout_secs);
    let endpoint: String = required(&matches, "overpass-url");

    let sources = OverpassSource::new(&endpoint, timeout)
        .and_then(|features| Ok((features, HttpTileProvider::new(timeout)?)));
    let (features, tiles) = match sources {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "unable to set up HTTP clients");
            std::process::exit(1)
        }
    };

    let resolver: Box<dyn CredentialResolver> = if config.interactive {
        Box::new(PromptResolver::stdin())
    } else {
        Box::new(FallbackResolver)
    };

    match run(&config, &features, &tiles, resolver.as_ref(), |var| std::env::var(var).ok()) {
        Ok(summary) => {
            info!(rendered = summary.rendered.len(), failed = summary.failed.len(), "done");
            if !summary.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!(error = %err, "run aborted");
            std::process::exit(1);
        }
    }
}
