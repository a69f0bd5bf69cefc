//! Predefined question sets, stored as TOML files

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// A named list of questions run together against one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<String>,
}

impl QuestionSet {
    pub fn from_toml(source: &str) -> Result<Self> {
        let set: QuestionSet = toml::from_str(source)
            .map_err(|e| CoreError::Format(format!("invalid question set: {}", e)))?;

        let questions: Vec<String> = set
            .questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if questions.is_empty() {
            return Err(CoreError::Format(format!(
                "question set '{}' has no questions",
                set.title
            )));
        }

        Ok(Self { questions, ..set })
    }
}

/// Questions from a plain-text file: one per line, blank lines skipped
pub fn questions_from_lines(source: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question_set() {
        let set = QuestionSet::from_toml(
            r#"
            title = "Trip planning"
            description = "What did we decide about the summer trip?"
            questions = ["Where are we going?", "  ", "When do we leave?"]
            "#,
        )
        .unwrap();

        assert_eq!(set.title, "Trip planning");
        assert_eq!(set.questions.len(), 2);
    }

    #[test]
    fn test_empty_question_set_rejected() {
        let err = QuestionSet::from_toml("title = \"x\"\nquestions = []").unwrap_err();
        assert!(err.to_string().contains("no questions"));
    }

    #[test]
    fn test_questions_from_lines() {
        let questions = questions_from_lines("first?\n\n  second?  \n");
        assert_eq!(questions, vec!["first?", "second?"]);
    }
}
