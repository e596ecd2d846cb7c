use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "spool-daemon", about = "Stream spooler: stream → rotated files → upload sink")]
pub struct Cli {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "spool.toml", env = "SPOOL_CONFIG")]
    pub config: String,

    /// Bearer-токен потока (перекрывает grabber.auth из конфига)
    #[arg(long, env = "SPOOL_STREAM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Подробнее: -v = debug, -vv = trace
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Только ошибки
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_filter() {
        let cli = Cli::parse_from(["spool-daemon", "-vv", "--config", "x.toml"]);
        assert_eq!(cli.log_level(), "trace");
        assert_eq!(cli.config, "x.toml");
        assert_eq!(Cli::parse_from(["spool-daemon", "-q"]).log_level(), "error");
        assert!(Cli::try_parse_from(["spool-daemon", "-q", "-v"]).is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = spool_engine::SpoolConfig::parse(include_str!("../spool.example.toml")).unwrap();
        assert_eq!(cfg.uploader.max_rejections, 5);
        assert!(matches!(cfg.grabber.auth, spool_engine::config::AuthConfig::Bearer { .. }));
    }
}
