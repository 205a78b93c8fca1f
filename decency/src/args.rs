/// Flags and command to change decency execution
#[derive(Debug, clap::Parser, PartialEq, Eq)]
#[clap(about, version, author)]
pub struct Args {
    /// Path of the decency configuration file (toml format)
    #[clap(short, long)]
    pub config: String,

    /// Commands
    #[clap(subcommand)]
    pub command: Option<Commands>,

    /// Stay attached to the terminal and log to stdout as well
    #[clap(short, long)]
    pub foreground: bool,
}

/// Subcommand run instead of the filter daemon
#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
pub enum Commands {
    /// Show the loaded config (as serialized json format)
    ConfigShow,
    /// Show the difference between the loaded config and the default one
    ConfigDiff,
    /// Feed a labeled corpus to the trainable filter modules
    Train {
        /// Directory holding one message per file
        #[clap(long)]
        corpus: std::path::PathBuf,
        /// Label of the corpus (spam|ham)
        #[clap(long)]
        label: String,
        /// Move consumed files into this directory
        #[clap(long)]
        move_to: Option<std::path::PathBuf>,
        /// Delete consumed files
        #[clap(long)]
        delete: bool,
    },
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn parse_arg() {
        assert!(<Args as clap::Parser>::try_parse_from([""]).is_err());

        assert_eq!(
            Args {
                command: None,
                config: "path".to_string(),
                foreground: false,
            },
            <Args as clap::Parser>::try_parse_from(["", "-c", "path"]).unwrap()
        );

        assert_eq!(
            Args {
                command: Some(Commands::ConfigShow),
                config: "path".to_string(),
                foreground: false,
            },
            <Args as clap::Parser>::try_parse_from(["", "-c", "path", "config-show"]).unwrap()
        );

        assert_eq!(
            Args {
                command: Some(Commands::ConfigDiff),
                config: "path".to_string(),
                foreground: true,
            },
            <Args as clap::Parser>::try_parse_from(["", "-c", "path", "-f", "config-diff"])
                .unwrap()
        );

        assert_eq!(
            Args {
                command: Some(Commands::Train {
                    corpus: "/var/corpus".into(),
                    label: "spam".to_string(),
                    move_to: None,
                    delete: true,
                }),
                config: "path".to_string(),
                foreground: false,
            },
            <Args as clap::Parser>::try_parse_from([
                "",
                "-c",
                "path",
                "train",
                "--corpus",
                "/var/corpus",
                "--label",
                "spam",
                "--delete"
            ])
            .unwrap()
        );
    }
}
