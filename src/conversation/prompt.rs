//! System prompt composition for chat turns.

use tracing::warn;

use crate::content::UserData;
use crate::template;

/// Build the system prompt for a turn: base persona, then the personalised
/// admin template, then the step's supplemental prompt, separated by blank
/// lines.
///
/// A template that fails to compile is logged and left out, so the turn
/// still runs with the unpersonalised prompt.
pub fn compose_system_prompt(
    persona: &str,
    template_source: Option<&str>,
    user: &UserData,
    supplemental: Option<&str>,
) -> String {
    let personalized = template_source
        .filter(|t| !t.trim().is_empty())
        .and_then(|t| match template::render_prompt(t, &user.personalization()) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "System prompt template failed to render, using base prompt");
                None
            }
        });

    [Some(persona.trim()), personalized.as_deref(), supplemental.map(str::trim)]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
