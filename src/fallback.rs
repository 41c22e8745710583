//! Offline answers for when the API cannot be reached.
//!
//! [`is_unreachable`] decides whether an API failure means "no connection"
//! (as opposed to a rejected request), and [`generic_response`] produces a
//! short canned reply so the conversation can continue.

use async_openai::error::OpenAIError;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::personality::Personality;

/// `true` for failures that mean the service could not be reached at all.
///
/// Authentication failures, invalid requests and other API-level errors are
/// not unreachable: retrying offline would hide a real misconfiguration.
pub fn is_unreachable(err: &OpenAIError) -> bool {
    match err {
        OpenAIError::Reqwest(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        OpenAIError::StreamError(_) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Thanks,
    Farewell,
    Question,
    Other,
}

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|howdy|good (morning|afternoon|evening)|greetings)\b")
        .expect("static regex")
});
static THANKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(thanks|thank you|thx|cheers)\b").expect("static regex"));
static FAREWELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(bye|goodbye|see you|good night|farewell)\b").expect("static regex")
});
static QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\?\s*$|^\s*(what|why|how|when|where|who|which|can|could|should|is|are|do|does)\b)")
        .expect("static regex")
});

pub fn classify(input: &str) -> Intent {
    if GREETING.is_match(input) {
        Intent::Greeting
    } else if THANKS.is_match(input) {
        Intent::Thanks
    } else if FAREWELL.is_match(input) {
        Intent::Farewell
    } else if QUESTION.is_match(input) {
        Intent::Question
    } else {
        Intent::Other
    }
}

/// A canned reply for `input`, noting that the model is offline.
pub fn generic_response(input: &str, personality: &Personality) -> String {
    let body = match classify(input) {
        Intent::Greeting => "Hello! I'm running in offline mode right now, but I'm still here.",
        Intent::Thanks => "You're welcome! Happy to help, even in offline mode.",
        Intent::Farewell => "Goodbye! Your conversation has been kept, so you can pick it up later.",
        Intent::Question => {
            "That's a good question. I can't reach the language model at the moment, \
             so I can't give a proper answer. Please try again once the connection is back."
        }
        Intent::Other => {
            "I've noted that. I can't reach the language model at the moment, \
             so my replies are limited until the connection is restored."
        }
    };
    format!("[offline · {}] {body}", personality.name)
}
