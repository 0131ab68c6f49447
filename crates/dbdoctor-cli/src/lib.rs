mod check_cmd;
mod cli;
mod config;
mod diagnose_cmd;

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let cmd = cli::parse_args(&args)?;
    match cmd {
        cli::Command::Help(topic) => {
            cli::print_help(topic);
            Ok(())
        }
        cli::Command::Diagnose(args) => diagnose_cmd::run(args).await,
        cli::Command::Check(args) => check_cmd::run(args),
    }
}
