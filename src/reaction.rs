use anyhow::Result;
use tracing::debug;

use crate::{
    llm::{Message, TextGenerator},
    persona::Persona,
};

pub const SYSTEM_PROMPT: &str =
    "You are simulating an investor responding in a conversational, candid tone.";

/// Marker the persona writes before its intent score.
pub const SCORE_MARKER: &str = "INTENT_SCORE:";

/// A persona's feedback paragraph and its 0-10 intent to act.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub feedback: String,
    pub score: f64,
}

pub fn render_prompt(persona: &Persona, creative: &str) -> String {
    format!(
        "You are {name}, a {age}-year-old {occupation} from {location}.\n\
         Below is a marketing creative you can read. Give your honest reaction in 2 short paragraphs, then\n\
         score your likelihood of taking the CTA from 0–10 on its own line in the form:\n\
         INTENT_SCORE: <number>\n\
         \n\
         CREATIVE:\n\
         ---------\n\
         {creative}\n\
         ---------\n",
        name = persona.name,
        age = persona.age,
        occupation = persona.occupation,
        location = persona.location,
    )
}

/// Splits a reply on the last score marker. A missing marker or an
/// unparseable score gives a score of zero.
pub fn parse_reaction(text: &str) -> Reaction {
    let (feedback, score) = match text.rsplit_once(SCORE_MARKER) {
        Some((feedback, score)) => {
            let score = score
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite())
                .unwrap_or(0.0);
            (feedback, score)
        }
        None => (text, 0.0),
    };
    Reaction {
        feedback: feedback.trim().to_string(),
        score,
    }
}

/// Asks `persona` for its reaction to `creative`.
pub async fn react(
    generator: &dyn TextGenerator,
    persona: &Persona,
    creative: &str,
) -> Result<Reaction> {
    let messages = [
        Message::system(SYSTEM_PROMPT),
        Message::user(render_prompt(persona, creative)),
    ];
    let reply = generator.generate(&messages).await?;
    let reaction = parse_reaction(&reply);
    debug!("{} scored {}", persona.name, reaction.score);
    Ok(reaction)
}
