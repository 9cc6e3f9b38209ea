use serde::{Deserialize, Serialize};

use crate::model::ids::{CertificationId, ChoiceId, QuestionId, SubtopicId};

/// A named exam grouping that owns a question pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub id: CertificationId,
    pub name: String,
}

/// A named slice of a certification's question pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtopic {
    pub id: SubtopicId,
    pub certification_id: CertificationId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub text: String,
    pub is_correct: bool,
}

/// A multiple-choice question together with its choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub certification_id: CertificationId,
    pub subtopic_id: Option<SubtopicId>,
    pub text: String,
    pub explanation: Option<String>,
    pub choices: Vec<Choice>,
}

impl Question {
    /// Looks up one of this question's choices.
    #[must_use]
    pub fn choice(&self, id: ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }

    /// The choice marked correct, if the question data has one.
    ///
    /// Questions are single-answer; when several choices are flagged the first
    /// one in choice order wins.
    #[must_use]
    pub fn correct_choice(&self) -> Option<&Choice> {
        self.choices.iter().find(|c| c.is_correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question {
            id: QuestionId::new(1),
            certification_id: CertificationId::new(1),
            subtopic_id: None,
            text: "Which service stores objects?".into(),
            explanation: Some("Object storage.".into()),
            choices: vec![
                Choice {
                    id: ChoiceId::new(10),
                    text: "Queue".into(),
                    is_correct: false,
                },
                Choice {
                    id: ChoiceId::new(11),
                    text: "Bucket".into(),
                    is_correct: true,
                },
            ],
        }
    }

    #[test]
    fn finds_choices_and_correct_answer() {
        let q = question();
        assert_eq!(q.choice(ChoiceId::new(10)).unwrap().text, "Queue");
        assert!(q.choice(ChoiceId::new(99)).is_none());
        assert_eq!(q.correct_choice().unwrap().id, ChoiceId::new(11));
    }

    #[test]
    fn correct_choice_is_none_when_data_is_broken() {
        let mut q = question();
        for c in &mut q.choices {
            c.is_correct = false;
        }
        assert!(q.correct_choice().is_none());
    }
}
