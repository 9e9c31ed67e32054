use chrono::NaiveDate;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub date: Option<NaiveDate>,
}

enum ParseOutcome {
    Args(CliArgs),
    Help,
}

fn usage() {
    eprintln!(
        "usage:
  rollsync [--config <path>] [--date YYYY-MM-DD]

  --date defaults to yesterday in the configured reference timezone
"
    );
}

fn parse_args_impl(mut args: impl Iterator<Item = String>) -> Result<ParseOutcome, String> {
    let mut config_path: Option<PathBuf> = None;
    let mut date: Option<NaiveDate> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            "--date" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--date requires a value".to_string())?;
                let parsed = NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                    .map_err(|_| format!("invalid --date `{value}`; expected YYYY-MM-DD"))?;
                date = Some(parsed);
            }
            "-h" | "--help" | "help" => {
                return Ok(ParseOutcome::Help);
            }
            other => return Err(format!("unknown argument `{other}`")),
        }
    }

    Ok(ParseOutcome::Args(CliArgs { config_path, date }))
}

pub fn parse_args() -> CliArgs {
    match parse_args_impl(std::env::args().skip(1)) {
        Ok(ParseOutcome::Args(args)) => args,
        Ok(ParseOutcome::Help) => {
            usage();
            std::process::exit(0);
        }
        Err(error) => {
            eprintln!("error: {error}");
            usage();
            std::process::exit(2);
        }
    }
}
