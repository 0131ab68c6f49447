use crate::cli::DiagnoseArgs;
use crate::config::{ConfigFile, DATABASE_URL_ENV, apply_timeout};
use dbdoctor::{
    AnalysisProvider, Diagnoser, DiagnosisReport, OfflineAnalyzer, OpenAiAnalyzer, QueryExecutor,
    create_pool,
};
use std::io::Read;

pub async fn run(args: DiagnoseArgs) -> anyhow::Result<()> {
    let config = ConfigFile::load(&args.config)?;

    let error_text = match args.error_text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| anyhow::anyhow!("failed to read stdin: {e}"))?;
            buf
        }
    };
    let error_text = error_text.trim();
    if error_text.is_empty() {
        anyhow::bail!("no error text provided (pass it as arguments or pipe it to stdin)");
    }

    let Some(database_url) = config.database_url(args.database.as_deref()) else {
        anyhow::bail!(
            "no database configured; pass --database, set database.url in {}, or set {DATABASE_URL_ENV}",
            args.config.path.display()
        );
    };

    let mut doctor_config = config.doctor_config();
    if let Some(max_rows) = args.max_rows {
        doctor_config = doctor_config.max_rows(max_rows);
    }
    doctor_config = apply_timeout(doctor_config, args.timeout_secs);

    let analyzer: Box<dyn AnalysisProvider> = match config.openai_config() {
        Some(openai) => Box::new(OpenAiAnalyzer::new(openai)?),
        None => {
            tracing::warn!("no OpenAI API key configured; using offline analysis");
            Box::new(OfflineAnalyzer)
        }
    };

    let pool = create_pool(&database_url)?;
    let doctor = Diagnoser::new(QueryExecutor::new(pool, doctor_config), analyzer);

    let report = doctor.diagnose(error_text, &args.db_type).await;
    println!("{}", render(&report, args.compact)?);

    if !report.success {
        anyhow::bail!("diagnosis failed");
    }
    Ok(())
}

fn render(report: &DiagnosisReport, compact: bool) -> anyhow::Result<String> {
    let out = if compact {
        serde_json::to_string(report)?
    } else {
        serde_json::to_string_pretty(report)?
    };
    Ok(out)
}
