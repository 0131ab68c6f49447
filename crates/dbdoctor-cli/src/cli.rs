use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "dbdoctor.toml";
pub const DEFAULT_DB_TYPE: &str = "postgresql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Diagnose,
    Check,
}

#[derive(Debug, Clone)]
pub enum Command {
    Help(HelpTopic),
    Diagnose(DiagnoseArgs),
    Check(CheckArgs),
}

/// Where the config file comes from.
///
/// A missing default file is fine; a missing file named with `--config` is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPath {
    pub path: PathBuf,
    pub explicit: bool,
}

impl Default for ConfigPath {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            explicit: false,
        }
    }
}

impl ConfigPath {
    fn explicit(v: &str) -> Self {
        Self {
            path: PathBuf::from(v),
            explicit: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnoseArgs {
    pub config: ConfigPath,
    pub database: Option<String>,
    pub db_type: String,
    pub max_rows: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub compact: bool,
    /// `None` means read the error text from stdin.
    pub error_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub config: ConfigPath,
    pub files: Vec<PathBuf>,
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    match first.as_str() {
        "-h" | "--help" => Ok(Command::Help(HelpTopic::Root)),
        "help" => Ok(Command::Help(match it.next().map(|s| s.as_str()) {
            None => HelpTopic::Root,
            Some("diagnose") => HelpTopic::Diagnose,
            Some("check") => HelpTopic::Check,
            Some(other) => anyhow::bail!("unknown help topic: {other}"),
        })),
        "diagnose" => parse_diagnose(it.map(|s| s.as_str())),
        "check" => parse_check(it.map(|s| s.as_str())),
        _ => anyhow::bail!("unknown command: {first}"),
    }
}

fn value<'a>(flag: &str, it: &mut impl Iterator<Item = &'a str>) -> anyhow::Result<&'a str> {
    let Some(v) = it.next() else {
        anyhow::bail!("{flag} requires a value");
    };
    Ok(v)
}

fn parse_number<T: std::str::FromStr>(flag: &str, v: &str) -> anyhow::Result<T> {
    v.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{flag} expects a non-negative integer, got `{v}`"))
}

fn parse_diagnose<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = ConfigPath::default();
    let mut database: Option<String> = None;
    let mut db_type = DEFAULT_DB_TYPE.to_string();
    let mut max_rows: Option<usize> = None;
    let mut timeout_secs: Option<u64> = None;
    let mut compact = false;
    let mut words: Vec<&str> = Vec::new();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Diagnose)),
            "--config" => config = ConfigPath::explicit(value(token, &mut it)?),
            _ if token.starts_with("--config=") => {
                config = ConfigPath::explicit(token.trim_start_matches("--config="));
            }
            "--database" => database = Some(value(token, &mut it)?.to_string()),
            _ if token.starts_with("--database=") => {
                database = Some(token.trim_start_matches("--database=").to_string());
            }
            "--db-type" => db_type = value(token, &mut it)?.to_string(),
            _ if token.starts_with("--db-type=") => {
                db_type = token.trim_start_matches("--db-type=").to_string();
            }
            "--max-rows" => max_rows = Some(parse_number(token, value(token, &mut it)?)?),
            _ if token.starts_with("--max-rows=") => {
                max_rows = Some(parse_number(
                    "--max-rows",
                    token.trim_start_matches("--max-rows="),
                )?);
            }
            "--timeout" => timeout_secs = Some(parse_number(token, value(token, &mut it)?)?),
            _ if token.starts_with("--timeout=") => {
                timeout_secs = Some(parse_number(
                    "--timeout",
                    token.trim_start_matches("--timeout="),
                )?);
            }
            "--compact" => compact = true,
            // Everything after `--` is error text, even if it looks like a flag.
            "--" => words.extend(it.by_ref()),
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            other => words.push(other),
        }
    }

    if max_rows == Some(0) {
        anyhow::bail!("--max-rows must be at least 1");
    }
    if db_type.trim().is_empty() {
        anyhow::bail!("--db-type must not be empty");
    }

    Ok(Command::Diagnose(DiagnoseArgs {
        config,
        database,
        db_type,
        max_rows,
        timeout_secs,
        compact,
        error_text: (!words.is_empty()).then(|| words.join(" ")),
    }))
}

fn parse_check<'a>(mut it: impl Iterator<Item = &'a str>) -> anyhow::Result<Command> {
    let mut config = ConfigPath::default();
    let mut files: Vec<PathBuf> = Vec::new();

    while let Some(token) = it.next() {
        match token {
            "-h" | "--help" => return Ok(Command::Help(HelpTopic::Check)),
            "--config" => config = ConfigPath::explicit(value(token, &mut it)?),
            _ if token.starts_with("--config=") => {
                config = ConfigPath::explicit(token.trim_start_matches("--config="));
            }
            other if other.starts_with('-') && other != "-" => {
                anyhow::bail!("unknown argument: {other}")
            }
            other => files.push(PathBuf::from(other)),
        }
    }

    Ok(Command::Check(CheckArgs { config, files }))
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => {
            println!(
                "\
dbdoctor - diagnose database errors with read-only investigation queries

USAGE:
  dbdoctor <COMMAND> [OPTIONS]

COMMANDS:
  diagnose      Analyze an error message and investigate the database
  check         Classify SQL statements as safe or unsafe
  help          Print help for a command

Run `dbdoctor <command> --help` for more."
            );
        }
        HelpTopic::Diagnose => {
            println!(
                "\
USAGE:
  dbdoctor diagnose [OPTIONS] [ERROR TEXT...]

Reads the error text from stdin when none is given. Prints the diagnosis
report as JSON and exits non-zero when the diagnosis itself failed.

OPTIONS:
  --config <FILE>       Config file path (default: dbdoctor.toml)
  --database <URL>      Override database.url from config
  --db-type <TYPE>      Database type passed to the analysis (default: postgresql)
  --max-rows <N>        Rows fetched per statement (default: 1000)
  --timeout <SECS>      Per-statement timeout, 0 disables it (default: 30)
  --compact             Print the report on one line
  -h, --help            Print help"
            );
        }
        HelpTopic::Check => {
            println!(
                "\
USAGE:
  dbdoctor check [OPTIONS] [FILES...]

Classifies each non-empty line of the given files (or stdin) as one
statement. Exits non-zero if any statement is unsafe.

OPTIONS:
  --config <FILE>       Config file path (default: dbdoctor.toml)
  -h, --help            Print help"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("dbdoctor")
            .chain(v.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn no_arguments_prints_help() {
        let cmd = parse_args(&args(&[])).unwrap();
        assert!(matches!(cmd, Command::Help(HelpTopic::Root)));
    }

    #[test]
    fn help_topics() {
        let cmd = parse_args(&args(&["help", "check"])).unwrap();
        assert!(matches!(cmd, Command::Help(HelpTopic::Check)));

        let cmd = parse_args(&args(&["diagnose", "--help"])).unwrap();
        assert!(matches!(cmd, Command::Help(HelpTopic::Diagnose)));
    }

    #[test]
    fn parse_diagnose_with_options() {
        let cmd = parse_args(&args(&[
            "diagnose",
            "--database",
            "postgres://localhost/app",
            "--db-type=mysql",
            "--max-rows",
            "50",
            "--timeout=0",
            "--compact",
            "too",
            "many",
            "connections",
        ]))
        .unwrap();
        let Command::Diagnose(d) = cmd else {
            panic!("expected diagnose");
        };

        assert_eq!(d.config, ConfigPath::default());
        assert_eq!(d.database.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(d.db_type, "mysql");
        assert_eq!(d.max_rows, Some(50));
        assert_eq!(d.timeout_secs, Some(0));
        assert!(d.compact);
        assert_eq!(d.error_text.as_deref(), Some("too many connections"));
    }

    #[test]
    fn diagnose_without_text_reads_stdin() {
        let Command::Diagnose(d) = parse_args(&args(&["diagnose"])).unwrap() else {
            panic!("expected diagnose");
        };
        assert!(d.error_text.is_none());
        assert_eq!(d.db_type, DEFAULT_DB_TYPE);
    }

    #[test]
    fn double_dash_keeps_flag_like_text() {
        let Command::Diagnose(d) =
            parse_args(&args(&["diagnose", "--", "--fatal", "error"])).unwrap()
        else {
            panic!("expected diagnose");
        };
        assert_eq!(d.error_text.as_deref(), Some("--fatal error"));
    }

    #[test]
    fn diagnose_rejects_bad_values() {
        assert!(parse_args(&args(&["diagnose", "--max-rows", "ten"])).is_err());
        assert!(parse_args(&args(&["diagnose", "--max-rows", "0"])).is_err());
        assert!(parse_args(&args(&["diagnose", "--timeout"])).is_err());
        assert!(parse_args(&args(&["diagnose", "--verbose"])).is_err());
    }

    #[test]
    fn parse_check_with_files() {
        let cmd = parse_args(&args(&[
            "check",
            "--config",
            "ops/dbdoctor.toml",
            "a.sql",
            "b.sql",
        ]))
        .unwrap();
        let Command::Check(c) = cmd else {
            panic!("expected check");
        };

        assert_eq!(c.config.path, PathBuf::from("ops/dbdoctor.toml"));
        assert!(c.config.explicit);
        assert_eq!(c.files, vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")]);
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_args(&args(&["migrate"])).is_err());
    }
}
