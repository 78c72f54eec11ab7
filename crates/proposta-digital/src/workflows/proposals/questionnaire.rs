//! Health questionnaire navigation: one cursor over (person, question) pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{DependentId, ProposalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthQuestion {
    pub id: u16,
    pub text: &'static str,
}

pub const HEALTH_QUESTIONS: [HealthQuestion; 10] = [
    HealthQuestion {
        id: 1,
        text: "Possui alguma doença crônica (diabetes, hipertensão, etc.)?",
    },
    HealthQuestion {
        id: 2,
        text: "Faz uso contínuo de algum medicamento?",
    },
    HealthQuestion {
        id: 3,
        text: "Realizou alguma cirurgia nos últimos 5 anos?",
    },
    HealthQuestion {
        id: 4,
        text: "Possui ou já teve alguma doença cardíaca?",
    },
    HealthQuestion {
        id: 5,
        text: "Possui ou já teve algum tipo de câncer?",
    },
    HealthQuestion {
        id: 6,
        text: "Possui alguma doença respiratória (asma, bronquite, DPOC)?",
    },
    HealthQuestion {
        id: 7,
        text: "Possui alguma deficiência física ou mental?",
    },
    HealthQuestion {
        id: 8,
        text: "Está grávida ou em tratamento para engravidar?",
    },
    HealthQuestion {
        id: 9,
        text: "Esteve internado(a) nos últimos 2 anos?",
    },
    HealthQuestion {
        id: 10,
        text: "Possui alguma alergia grave?",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    #[serde(rename = "Sim", alias = "sim")]
    Sim,
    #[serde(rename = "Não", alias = "nao", alias = "não", alias = "Nao")]
    Nao,
}

impl Answer {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sim => "Sim",
            Self::Nao => "Não",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub answer: Answer,
    #[serde(default)]
    pub details: String,
}

/// Where the cursor sits: on a question, or on the summary after the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowPosition {
    Question { person: usize, question: usize },
    Tally,
}

/// Positive-answer counts shown on the summary screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub per_person: Vec<usize>,
    pub total_positive: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("question {question_id} for person {person} has no answer")]
    Unanswered { person: usize, question_id: u16 },
    #[error("question {question_id} for person {person} was answered yes without details")]
    MissingDetails { person: usize, question_id: u16 },
    #[error("answers cannot change while the summary is shown")]
    SummaryShown,
    #[error("expected answers for {expected} people, received {received}")]
    RespondentMismatch { expected: usize, received: usize },
    #[error("expected {expected} answers per person, received {received}")]
    QuestionMismatch { expected: usize, received: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireFlow {
    answers: Vec<Vec<Option<QuestionAnswer>>>,
    person: usize,
    question: usize,
    showing_tally: bool,
}

impl Default for QuestionnaireFlow {
    fn default() -> Self {
        Self::new(1)
    }
}

impl QuestionnaireFlow {
    /// Flow for the holder plus `respondents - 1` dependents. Always at least one person.
    pub fn new(respondents: usize) -> Self {
        Self {
            answers: vec![vec![None; HEALTH_QUESTIONS.len()]; respondents.max(1)],
            person: 0,
            question: 0,
            showing_tally: false,
        }
    }

    /// Builds a completed flow from submitted answers, as used by the completion page.
    pub fn from_answers(
        respondents: usize,
        answers: Vec<Vec<QuestionAnswer>>,
    ) -> Result<Self, FlowError> {
        let expected = respondents.max(1);
        if answers.len() != expected {
            return Err(FlowError::RespondentMismatch {
                expected,
                received: answers.len(),
            });
        }

        let mut flow = Self::new(expected);
        for (person, person_answers) in answers.into_iter().enumerate() {
            if person_answers.len() != HEALTH_QUESTIONS.len() {
                return Err(FlowError::QuestionMismatch {
                    expected: HEALTH_QUESTIONS.len(),
                    received: person_answers.len(),
                });
            }
            flow.answers[person] = person_answers.into_iter().map(Some).collect();
        }
        flow.check_answers()?;
        flow.showing_tally = true;
        Ok(flow)
    }

    pub fn respondents(&self) -> usize {
        self.answers.len()
    }

    /// Tracks the respondent count. Answers are kept by position, so removing someone in
    /// the middle must be followed by [`QuestionnaireFlow::clear_from`].
    pub fn resize(&mut self, respondents: usize) {
        let respondents = respondents.max(1);
        self.answers
            .resize_with(respondents, || vec![None; HEALTH_QUESTIONS.len()]);
        if self.person >= respondents {
            self.person = respondents - 1;
            self.question = 0;
        }
        if !self.is_complete() {
            self.showing_tally = false;
        }
    }

    /// Forgets the answers of `person` and everyone after them. The holder is never cleared.
    pub fn clear_from(&mut self, person: usize) {
        let person = person.max(1);
        if person >= self.answers.len() {
            return;
        }
        for answers in self.answers.iter_mut().skip(person) {
            answers.fill(None);
        }
        if self.person >= person {
            self.person = person;
            self.question = 0;
        }
        if !self.is_complete() {
            self.showing_tally = false;
        }
    }

    pub fn position(&self) -> FlowPosition {
        if self.showing_tally {
            FlowPosition::Tally
        } else {
            FlowPosition::Question {
                person: self.person,
                question: self.question,
            }
        }
    }

    pub fn current_question(&self) -> Option<&'static HealthQuestion> {
        if self.showing_tally {
            None
        } else {
            HEALTH_QUESTIONS.get(self.question)
        }
    }

    pub fn current_answer(&self) -> Option<&QuestionAnswer> {
        if self.showing_tally {
            return None;
        }
        self.answers[self.person][self.question].as_ref()
    }

    pub fn answers_for(&self, person: usize) -> Option<&[Option<QuestionAnswer>]> {
        self.answers.get(person).map(Vec::as_slice)
    }

    /// Records an answer for the current question. Changing the answer clears details
    /// unless new ones are supplied.
    pub fn answer(&mut self, answer: Answer, details: Option<String>) -> Result<(), FlowError> {
        if self.showing_tally {
            return Err(FlowError::SummaryShown);
        }
        let slot = &mut self.answers[self.person][self.question];
        let details = match (details, slot.as_ref()) {
            (Some(details), _) => details,
            (None, Some(previous)) if previous.answer == answer => previous.details.clone(),
            (None, _) => String::new(),
        };
        *slot = Some(QuestionAnswer { answer, details });
        Ok(())
    }

    /// Moves forward. Blocks on an unanswered question or a "Sim" without details.
    pub fn next(&mut self) -> Result<FlowPosition, FlowError> {
        if self.showing_tally {
            return Ok(FlowPosition::Tally);
        }
        let question_id = HEALTH_QUESTIONS[self.question].id;
        match &self.answers[self.person][self.question] {
            None => {
                return Err(FlowError::Unanswered {
                    person: self.person,
                    question_id,
                })
            }
            Some(answer) if answer.answer == Answer::Sim && answer.details.trim().is_empty() => {
                return Err(FlowError::MissingDetails {
                    person: self.person,
                    question_id,
                })
            }
            Some(_) => {}
        }

        if self.question + 1 < HEALTH_QUESTIONS.len() {
            self.question += 1;
        } else if self.person + 1 < self.answers.len() {
            self.person += 1;
            self.question = 0;
        } else {
            self.showing_tally = true;
        }
        Ok(self.position())
    }

    /// Moves back one question, crossing into the previous person's last question.
    /// From the summary it returns to the last question.
    pub fn previous(&mut self) -> FlowPosition {
        if self.showing_tally {
            self.showing_tally = false;
        } else if self.question > 0 {
            self.question -= 1;
        } else if self.person > 0 {
            self.person -= 1;
            self.question = HEALTH_QUESTIONS.len() - 1;
        }
        self.position()
    }

    /// Leaves the summary and restarts review from the first question of the holder.
    pub fn review(&mut self) -> FlowPosition {
        self.showing_tally = false;
        self.person = 0;
        self.question = 0;
        self.position()
    }

    pub fn is_complete(&self) -> bool {
        self.check_answers().is_ok()
    }

    fn check_answers(&self) -> Result<(), FlowError> {
        for (person, answers) in self.answers.iter().enumerate() {
            for (question, answer) in HEALTH_QUESTIONS.iter().zip(answers) {
                match answer {
                    None => {
                        return Err(FlowError::Unanswered {
                            person,
                            question_id: question.id,
                        })
                    }
                    Some(answer)
                        if answer.answer == Answer::Sim && answer.details.trim().is_empty() =>
                    {
                        return Err(FlowError::MissingDetails {
                            person,
                            question_id: question.id,
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn tally(&self) -> Tally {
        let per_person: Vec<usize> = self
            .answers
            .iter()
            .map(|answers| {
                answers
                    .iter()
                    .flatten()
                    .filter(|answer| answer.answer == Answer::Sim)
                    .count()
            })
            .collect();
        let total_positive = per_person.iter().sum();
        Tally {
            per_person,
            total_positive,
        }
    }

    /// Answers for one person in the persisted shape. `None` until every question is answered.
    pub fn recorded_answers(&self, person: usize) -> Option<Vec<RecordedAnswer>> {
        let answers = self.answers.get(person)?;
        HEALTH_QUESTIONS
            .iter()
            .zip(answers)
            .map(|(question, answer)| {
                answer.as_ref().map(|answer| RecordedAnswer {
                    question_id: question.id,
                    question: question.text.to_string(),
                    answer: answer.answer,
                    details: Some(answer.details.trim().to_string())
                        .filter(|details| !details.is_empty()),
                })
            })
            .collect()
    }
}

/// Whose answers a stored response holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "person_kind", rename_all = "snake_case")]
pub enum Respondent {
    Holder,
    Dependent { dependent_id: DependentId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub question_id: u16,
    pub question: String,
    pub answer: Answer,
    pub details: Option<String>,
}

/// One person's persisted questionnaire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireResponse {
    pub proposal_id: ProposalId,
    pub respondent: Respondent,
    pub answers: Vec<RecordedAnswer>,
    pub created_at: DateTime<Utc>,
}

impl QuestionnaireResponse {
    pub fn positive_answers(&self) -> impl Iterator<Item = &RecordedAnswer> {
        self.answers
            .iter()
            .filter(|answer| answer.answer == Answer::Sim)
    }
}
