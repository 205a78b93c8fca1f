use crate::Config;

#[doc(hidden)]
pub fn get_log4rs_config(config: &Config, foreground: bool) -> anyhow::Result<log4rs::Config> {
    use anyhow::Context;
    use log4rs::{append, config, encode, Config};

    let server = append::file::FileAppender::builder()
        .encoder(Box::new(encode::pattern::PatternEncoder::new(
            &config.server.logs.format,
        )))
        .build(&config.server.logs.filepath)
        .with_context(|| format!("For filepath: '{}'", config.server.logs.filepath.display()))?;

    let mut builder = Config::builder();
    let mut root = config::Root::builder();

    if foreground {
        builder = builder.appender(
            config::Appender::builder().build(
                "stdout",
                Box::new(
                    append::console::ConsoleAppender::builder()
                        .encoder(Box::new(encode::pattern::PatternEncoder::new(
                            "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} $ {m}{n}",
                        )))
                        .build(),
                ),
            ),
        );
        root = root.appender("stdout");
    }

    builder
        .appender(config::Appender::builder().build("server", Box::new(server)))
        .loggers(
            config
                .server
                .logs
                .level
                .iter()
                .filter(|(name, _)| name.as_str() != "default")
                .map(|(name, level)| config::Logger::builder().build(name.clone(), *level)),
        )
        .build(
            root.appender("server").build(
                *config
                    .server
                    .logs
                    .level
                    .get("default")
                    .unwrap_or(&log::LevelFilter::Warn),
            ),
        )
        .map_err(|e| {
            e.errors().iter().for_each(|e| log::error!("{}", e));
            anyhow::anyhow!(e)
        })
}

#[cfg(test)]
mod tests {
    use crate::Config;

    use super::get_log4rs_config;

    #[test]
    fn init() {
        let mut config = Config::default();
        config.server.logs.filepath = std::env::temp_dir()
            .join("decency-log4rs-test")
            .join("filter.log");

        let res = get_log4rs_config(&config, true);
        assert!(res.is_ok(), "{:?}", res);
        let res = get_log4rs_config(&config, false);
        assert!(res.is_ok(), "{:?}", res);
    }
}
