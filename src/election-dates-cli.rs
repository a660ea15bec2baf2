//! Print the next election date for a jurisdiction, using the same rules as
//! the `/election-dates` endpoint.

use chrono::{NaiveDate, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::serde::json::serde_json;

use civic_vote_backend::election_dates::{next_election_date, ElectionDate};
use civic_vote_backend::model::common::Jurisdiction;

const PROGRAM_NAME: &str = "election-dates";

const ABOUT_TEXT: &str = "Estimate the next general election date for a Canadian jurisdiction.

EXIT CODES:
     0: Success.
     1: Invalid arguments.";

const JURISDICTION: &str = "JURISDICTION";
const NAME: &str = "name";
const FROM: &str = "from";
const JSON: &str = "json";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(JURISDICTION)
                .help("Level of government")
                .value_parser(["federal", "provincial", "municipal"])
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(NAME)
                .long(NAME)
                .short('n')
                .help("Province or municipality, e.g. \"Ontario\" or \"Toronto\"")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new(FROM)
                .long(FROM)
                .short('f')
                .help("Find the first election on or after this date (YYYY-MM-DD); defaults to today")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new(JSON)
                .long(JSON)
                .help("Print the result as JSON")
                .action(ArgAction::SetTrue),
        )
}

/// Human-readable rendering of a result.
fn describe(date: &ElectionDate) -> String {
    let kind = if date.estimated { "estimated" } else { "fixed date" };
    format!("{} ({kind}: {})", date.date.format("%A %-d %B %Y"), date.rule)
}

/// Work out the election date the arguments ask for.
fn lookup(args: &ArgMatches) -> Result<ElectionDate, String> {
    // Required argument is guaranteed to be present.
    let jurisdiction = match args.get_one::<String>(JURISDICTION).unwrap().as_str() {
        "federal" => Jurisdiction::Federal,
        "provincial" => Jurisdiction::Provincial,
        _ => Jurisdiction::Municipal,
    };
    let name = args.get_one::<String>(NAME).map(String::as_str);
    let reference = match args.get_one::<String>(FROM) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| format!("'{raw}' is not a date in YYYY-MM-DD format"))?,
        None => Utc::now().date_naive(),
    };
    Ok(next_election_date(jurisdiction, name, reference))
}

/// Look up and print the date, returning the exit code.
fn run(args: &ArgMatches) -> u8 {
    match lookup(args) {
        Ok(date) if args.get_flag(JSON) => {
            // Serialising plain strings and dates can't fail.
            println!("{}", serde_json::to_string(&date).unwrap_or_default());
            0
        }
        Ok(date) => {
            println!("{}", describe(&date));
            0
        }
        Err(msg) => {
            println!("{msg}");
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(command_line: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(command_line).unwrap()
    }

    #[test]
    fn lookups() {
        log4rs_test_utils::test_logging::init_logging_once_for(["civic_vote_backend"], None, None);

        let date = lookup(&matches(&[PROGRAM_NAME, "federal", "--from", "2025-01-01"])).unwrap();
        assert_eq!(date.date, NaiveDate::from_ymd_opt(2025, 10, 20).unwrap());
        assert_eq!(
            describe(&date),
            "Monday 20 October 2025 (estimated: third Monday of October, every 4 years from 2025)"
        );

        let date = lookup(&matches(&[
            PROGRAM_NAME,
            "municipal",
            "-n",
            "Toronto",
            "-f",
            "2024-01-01",
        ]))
        .unwrap();
        assert_eq!(date.date, NaiveDate::from_ymd_opt(2026, 10, 26).unwrap());
        assert!(!date.estimated);

        assert!(lookup(&matches(&[PROGRAM_NAME, "federal", "--from", "20/10/2025"])).is_err());
    }

    #[test]
    fn correct_cli_usage() {
        assert_eq!(run(&matches(&[PROGRAM_NAME, "federal"])), 0);
        assert_eq!(run(&matches(&[PROGRAM_NAME, "provincial", "--name", "Ontario", "--json"])), 0);
        assert_eq!(run(&matches(&[PROGRAM_NAME, "municipal", "--from", "soon"])), 1);
    }

    #[test]
    fn bad_cli_usage() {
        // Unknown level.
        cli().try_get_matches_from([PROGRAM_NAME, "regional"]).unwrap_err();

        // No arguments at all.
        cli().try_get_matches_from([PROGRAM_NAME]).unwrap_err();
    }
}
