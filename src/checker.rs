mod events;

use events::rejections::explain_rejection;
use events::track::TrackPayload;

use std::path::PathBuf;
use std::process::ExitCode;
use chrono::Utc;
use clap::Parser;

/// Tells whether /track would accept an event, and why not
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Files holding one event each, read from stdin when none are given
    events: Vec<PathBuf>,
}

/// What /track would make of a payload
fn verdict(payload: &str) -> Result<String, Vec<String>> {
    match TrackPayload::from_body(payload) {
        Ok(payload) => {
            let record = payload.normalize(Utc::now());
            Ok(format!("No errors. event={:?} timestamp={}", record.event, record.timestamp.to_rfc3339()))
        },
        Err(_) => Err(explain_rejection(payload)),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let inputs = match args.events.is_empty() {
        true => vec![(String::from("stdin"), std::io::read_to_string(std::io::stdin()))],
        false => args.events.iter()
            .map(|path| (path.display().to_string(), std::fs::read_to_string(path)))
            .collect(),
    };
    let named = inputs.len() > 1;

    let mut status = ExitCode::SUCCESS;
    for (name, input) in inputs {
        let prefix = if named { format!("{}: ", name) } else { String::new() };
        match input.map(|payload| verdict(&payload)) {
            Ok(Ok(summary)) => println!("{}{}", prefix, summary),
            Ok(Err(explanations)) => {
                for explanation in explanations {
                    println!("{}{}", prefix, explanation);
                }
                status = ExitCode::FAILURE;
            },
            Err(e) => {
                eprintln!("failed to read {}: {}", name, e);
                status = ExitCode::FAILURE;
            },
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_event_is_summarised() {
        let summary = verdict(r#"{"event":"page_view","ts":"2024-02-03T04:05:06Z"}"#).unwrap();
        assert_eq!(summary, "No errors. event=\"page_view\" timestamp=2024-02-03T04:05:06+00:00");
    }

    #[test]
    fn rejected_event_is_explained() {
        let explanations = verdict(r#"{"event": 42}"#).unwrap_err();
        assert!(!explanations.is_empty());
        assert!(explanations[0].starts_with("(1)"));
    }

    #[test]
    fn trailing_data_gets_an_explanation() {
        let explanations = verdict(r#"{"event":"x"} {"event":"y"}"#).unwrap_err();
        assert_eq!(explanations.len(), 1);
        assert!(explanations[0].starts_with("(1) invalid JSON structure"));
    }
}
