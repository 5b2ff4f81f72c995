//! Structured worksheet answers stored on a completion step.

use serde::{Deserialize, Serialize};

/// Tagged union of every worksheet answer shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepResponses {
    Text {
        content: String,
    },
    ShortPhrase {
        content: String,
    },
    Statement {
        content: String,
    },
    IkigaiGrid(IkigaiGrid),
    MultiPrompt {
        responses: Vec<PromptAnswer>,
    },
    Questionnaire {
        responses: Vec<QuestionnaireAnswer>,
    },
    Categorization {
        categories: Categories,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        synthesis: Option<String>,
    },
    Narrative(Narrative),
    Pillars {
        pillar: Pillar,
        #[serde(default)]
        responses: serde_json::Map<String, serde_json::Value>,
    },
    Conversation {
        messages: Vec<ConversationEntry>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IkigaiGrid {
    pub passion: String,
    pub dislikes: String,
    pub competency: String,
    pub ineptitude: String,
    pub financial_success: String,
    pub financial_missed: String,
    pub impact: String,
    pub indifference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passion_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dislikes_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competency_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ineptitude_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_success_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_missed_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_synthesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indifference_synthesis: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptAnswer {
    pub prompt_id: String,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireAnswer {
    pub question_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub question: String,
    pub answer: Answer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Answer {
    One(String),
    Many(Vec<String>),
}

impl Answer {
    fn as_text(&self) -> String {
        match self {
            Answer::One(s) => s.clone(),
            Answer::Many(items) => items.join(", "),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Categories {
    #[serde(default)]
    pub essential: Vec<Desire>,
    #[serde(default)]
    pub noble: Vec<Desire>,
    #[serde(default)]
    pub clinging: Vec<Desire>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Desire {
    pub id: String,
    pub desire: String,
    pub why: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip_side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Narrative {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflections: Option<Reflections>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Reflections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_beliefs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empowering_beliefs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liberation: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pillar {
    Wealth,
    Health,
    #[serde(rename = "self")]
    Personal,
    Love,
}

impl Pillar {
    fn label(self) -> &'static str {
        match self {
            Pillar::Wealth => "Wealth",
            Pillar::Health => "Health",
            Pillar::Personal => "Self",
            Pillar::Love => "Love",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
}

impl StepResponses {
    /// Flatten the answers into the plain-text result stored on the step.
    pub fn to_result_text(&self) -> String {
        let mut sections: Vec<String> = Vec::new();
        let mut push = |label: &str, value: &str| push_section(&mut sections, label, value);

        match self {
            StepResponses::Text { content }
            | StepResponses::ShortPhrase { content }
            | StepResponses::Statement { content } => push("", content),
            StepResponses::IkigaiGrid(grid) => {
                let fields = [
                    ("Passion", &grid.passion, &grid.passion_synthesis),
                    ("Dislikes", &grid.dislikes, &grid.dislikes_synthesis),
                    ("Competency", &grid.competency, &grid.competency_synthesis),
                    ("Ineptitude", &grid.ineptitude, &grid.ineptitude_synthesis),
                    (
                        "Financial success",
                        &grid.financial_success,
                        &grid.financial_success_synthesis,
                    ),
                    (
                        "Financial missed",
                        &grid.financial_missed,
                        &grid.financial_missed_synthesis,
                    ),
                    ("Impact", &grid.impact, &grid.impact_synthesis),
                    ("Indifference", &grid.indifference, &grid.indifference_synthesis),
                ];
                for (label, value, synthesis) in fields {
                    push(label, value);
                    if let Some(synthesis) = synthesis {
                        push(&format!("{} synthesis", label), synthesis);
                    }
                }
            }
            StepResponses::MultiPrompt { responses } => {
                for r in responses {
                    push(&r.question, &r.answer);
                }
            }
            StepResponses::Questionnaire { responses } => {
                for r in responses {
                    push(&r.question, &r.answer.as_text());
                }
            }
            StepResponses::Categorization {
                categories,
                synthesis,
            } => {
                for (label, desires) in [
                    ("Essential", &categories.essential),
                    ("Noble", &categories.noble),
                    ("Clinging", &categories.clinging),
                ] {
                    let mut desires: Vec<&Desire> = desires.iter().collect();
                    desires.sort_by_key(|d| d.rank.unwrap_or(u32::MAX));
                    let lines: Vec<String> = desires
                        .iter()
                        .map(|d| format!("- {} ({})", d.desire.trim(), d.why.trim()))
                        .collect();
                    push(label, &lines.join("\n"));
                }
                if let Some(synthesis) = synthesis {
                    push("Synthesis", synthesis);
                }
            }
            StepResponses::Narrative(narrative) => {
                if let Some(title) = &narrative.title {
                    push("Title", title);
                }
                push("", &narrative.content);
                if let Some(reflections) = &narrative.reflections {
                    if let Some(beliefs) = &reflections.false_beliefs {
                        push("False beliefs", &beliefs.join("\n"));
                    }
                    if let Some(beliefs) = &reflections.empowering_beliefs {
                        push("Empowering beliefs", &beliefs.join("\n"));
                    }
                    if let Some(liberation) = &reflections.liberation {
                        push("Liberation", liberation);
                    }
                }
            }
            StepResponses::Pillars { pillar, responses } => {
                let lines: Vec<String> = responses
                    .iter()
                    .filter_map(|(key, value)| {
                        let text = match value {
                            serde_json::Value::String(s) => s.trim().to_string(),
                            serde_json::Value::Null => String::new(),
                            other => other.to_string(),
                        };
                        (!text.is_empty()).then(|| format!("{}: {}", key, text))
                    })
                    .collect();
                push(pillar.label(), &lines.join("\n"));
            }
            StepResponses::Conversation { messages } => {
                let lines: Vec<String> = messages
                    .iter()
                    .filter(|m| !m.content.trim().is_empty())
                    .map(|m| format!("{}: {}", m.role, m.content.trim()))
                    .collect();
                push("", &lines.join("\n"));
            }
        }

        sections.join("\n\n")
    }
}

fn push_section(sections: &mut Vec<String>, label: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    if label.is_empty() {
        sections.push(value.to_string());
    } else {
        sections.push(format!("{}:\n{}", label, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_phrase_flattens_to_its_content() {
        let r: StepResponses =
            serde_json::from_value(json!({"type": "shortPhrase", "content": " Be kind "})).unwrap();
        assert_eq!(r.to_result_text(), "Be kind");
    }

    #[test]
    fn ikigai_grid_skips_empty_cells() {
        let r: StepResponses = serde_json::from_value(json!({
            "type": "ikigaiGrid",
            "passion": "Music",
            "dislikes": "",
            "competency": "Code",
            "ineptitude": "",
            "financialSuccess": "",
            "financialMissed": "",
            "impact": "",
            "indifference": "",
            "passionSynthesis": "Sound"
        }))
        .unwrap();
        assert_eq!(
            r.to_result_text(),
            "Passion:\nMusic\n\nPassion synthesis:\nSound\n\nCompetency:\nCode"
        );
    }

    #[test]
    fn questionnaire_accepts_single_and_multi_answers() {
        let r: StepResponses = serde_json::from_value(json!({
            "type": "questionnaire",
            "responses": [
                {"questionId": "q1", "question": "Name", "answer": "Ada"},
                {"questionId": "q2", "question": "Values", "answer": ["calm", "truth"]}
            ]
        }))
        .unwrap();
        assert_eq!(r.to_result_text(), "Name:\nAda\n\nValues:\ncalm, truth");
    }

    #[test]
    fn categorization_orders_by_rank() {
        let r: StepResponses = serde_json::from_value(json!({
            "type": "categorization",
            "categories": {
                "essential": [
                    {"id": "2", "desire": "Rest", "why": "energy", "source": "body", "rank": 2},
                    {"id": "1", "desire": "Food", "why": "life", "source": "body", "rank": 1}
                ],
                "noble": [],
                "clinging": []
            }
        }))
        .unwrap();
        assert_eq!(
            r.to_result_text(),
            "Essential:\n- Food (life)\n- Rest (energy)"
        );
    }

    #[test]
    fn pillar_self_round_trips_as_keyword() {
        let r: StepResponses = serde_json::from_value(json!({
            "type": "pillars",
            "pillar": "self",
            "responses": {"focus": "meditation"}
        }))
        .unwrap();
        assert!(matches!(r, StepResponses::Pillars { pillar: Pillar::Personal, .. }));
        assert_eq!(serde_json::to_value(&r).unwrap()["pillar"], "self");
        assert_eq!(r.to_result_text(), "Self:\nfocus: meditation");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let r = serde_json::from_value::<StepResponses>(json!({"type": "poem", "content": "x"}));
        assert!(r.is_err());
    }
}
