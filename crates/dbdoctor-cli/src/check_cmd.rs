use crate::cli::CheckArgs;
use crate::config::ConfigFile;
use dbdoctor::{QueryValidator, Verdict};
use std::io::Read;

/// One classified statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedLine {
    pub location: String,
    pub sql: String,
    pub verdict: Verdict,
}

impl std::fmt::Display for CheckedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.verdict.reason {
            None => write!(f, "{}: ok: {}", self.location, self.sql),
            Some(reason) => write!(f, "{}: unsafe ({reason}): {}", self.location, self.sql),
        }
    }
}

pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = ConfigFile::load(&args.config)?;
    let validator = QueryValidator::new(config.safety_policy());

    let mut checked = Vec::new();
    if args.files.is_empty() || args.files.iter().any(|f| f.as_os_str() == "-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| anyhow::anyhow!("failed to read stdin: {e}"))?;
        checked.extend(check_source(&validator, "stdin", &buf));
    }
    for file in args.files.iter().filter(|f| f.as_os_str() != "-") {
        let content = std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", file.display()))?;
        checked.extend(check_source(&validator, &file.display().to_string(), &content));
    }

    if checked.is_empty() {
        anyhow::bail!("no SQL provided (pass files or pipe SQL to stdin)");
    }

    for line in &checked {
        println!("{line}");
    }

    let unsafe_count = checked.iter().filter(|c| !c.verdict.is_safe).count();
    if unsafe_count > 0 {
        anyhow::bail!(
            "{unsafe_count} of {} statement(s) are unsafe",
            checked.len()
        );
    }
    Ok(())
}

/// Classify each non-empty line of `content` as one statement.
pub fn check_source(validator: &QueryValidator, source: &str, content: &str) -> Vec<CheckedLine> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| CheckedLine {
            location: format!("{source}:{}", idx + 1),
            sql: line.trim().to_string(),
            verdict: validator.validate(line),
        })
        .collect()
}
