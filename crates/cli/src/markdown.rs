//! Markdown reports written by the query commands

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chatrag_core::{QueryOutcome, QueryResult, QuestionSet};

pub const BATCH_REPORT_HEADER: &str = "# Chat Analysis Results\n\n";

/// Single question and answer
pub fn answer_document(result: &QueryResult) -> String {
    format!(
        "# Question\n\n{}\n\n# Answer\n\n{}\n",
        result.question, result.answer
    )
}

pub fn outcome_section(outcome: &QueryOutcome) -> String {
    match outcome {
        QueryOutcome::Answered(result) => format!("## {}\n\n{}\n\n", result.question, result.answer),
        QueryOutcome::Failed(failure) => {
            format!("## {}\n\nError: {}\n\n", failure.question, failure.error)
        }
    }
}

/// Report for a question set run
pub fn question_set_document(set: &QuestionSet, date: &str, outcomes: &[QueryOutcome]) -> String {
    let mut document = format!(
        "# {}\n\n{}\n\nAnalysis date: {}\n\n",
        set.title, set.description, date
    );
    for outcome in outcomes {
        document.push_str(&outcome_section(outcome));
    }
    document
}

/// Append answers to `path`, starting a new report when it is missing or
/// empty
pub fn append_batch_report(path: &Path, outcomes: &[QueryOutcome]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let fresh = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    if fresh {
        file.write_all(BATCH_REPORT_HEADER.as_bytes())?;
    }
    for outcome in outcomes {
        file.write_all(outcome_section(outcome).as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrag_core::QueryFailure;

    fn answered(question: &str, answer: &str) -> QueryOutcome {
        QueryOutcome::Answered(QueryResult {
            question: question.into(),
            answer: answer.into(),
            relevant_count: 3,
            elapsed_seconds: 1.5,
        })
    }

    fn failed(question: &str) -> QueryOutcome {
        QueryOutcome::Failed(QueryFailure {
            question: question.into(),
            error: "Model error: timed out".into(),
        })
    }

    #[test]
    fn test_sections() {
        assert_eq!(outcome_section(&answered("Q?", "A.")), "## Q?\n\nA.\n\n");
        assert_eq!(
            outcome_section(&failed("Q?")),
            "## Q?\n\nError: Model error: timed out\n\n"
        );
    }

    #[test]
    fn test_batch_report_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.md");

        append_batch_report(&path, &[answered("one?", "1")]).unwrap();
        append_batch_report(&path, &[failed("two?")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("# Chat Analysis Results").count(), 1);
        assert!(content.starts_with(BATCH_REPORT_HEADER));
        assert!(content.contains("## one?\n\n1\n\n"));
        assert!(content.ends_with("## two?\n\nError: Model error: timed out\n\n"));
    }

    #[test]
    fn test_question_set_document() {
        let set = QuestionSet {
            title: "Trip".into(),
            description: "Summer trip".into(),
            questions: vec!["where?".into()],
        };
        let doc = question_set_document(&set, "2024-07-01", &[answered("where?", "Lake")]);
        assert!(doc.starts_with("# Trip\n\nSummer trip\n\nAnalysis date: 2024-07-01\n\n"));
        assert!(doc.ends_with("## where?\n\nLake\n\n"));
    }
}
