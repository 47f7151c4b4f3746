//! Turns server validation messages into something a person can read.
//!
//! Server messages tend to look like `body.video_title: value_error.missing`
//! or `ValidationError: string_too_short`. [`humanize`] strips the technical
//! prefixes, expands snake_case identifiers into words and capitalises the
//! result.

use std::sync::OnceLock;

use regex::Regex;

use super::FieldError;

fn error_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Za-z]*Error|Value error|Assertion failed)\s*[:,]\s*")
            .expect("invalid error prefix regex")
    })
}

fn location_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:body|query|path|header|cookie)(?:\.[\w\[\]]+)*\s*:\s*")
            .expect("invalid location prefix regex")
    })
}

fn dotted_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([a-z]+_error|type_error|value_error)\.").expect("invalid code regex")
    })
}

fn snake_case_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b").expect("invalid snake_case regex")
    })
}

/// Normalises a technical message into a readable sentence fragment.
///
/// Returns an empty string only when the input has no readable content.
pub fn humanize(message: &str) -> String {
    let mut text = message.trim().to_string();

    // Prefixes can stack, e.g. "ValidationError: body.title: ...".
    loop {
        let stripped = {
            let once = error_prefix().replace(&text, "");
            location_prefix().replace(&once, "").into_owned()
        };
        if stripped == text {
            break;
        }
        text = stripped;
    }

    let text = dotted_code().replace_all(&text, "");
    let text = snake_case_word().replace_all(&text, |caps: &regex::Captures<'_>| {
        caps[0].replace('_', " ")
    });

    capitalize(text.trim())
}

/// Humanises a field name like `video_title` into `Video title`.
pub fn humanize_field(field: &str) -> String {
    capitalize(&field.replace(['_', '-'], " "))
}

/// Produces the user message for a set of field errors.
pub fn summarize_field_errors(errors: &[FieldError]) -> Option<String> {
    let first = errors.first()?;
    let message = humanize(&first.message);
    let line = match first.field() {
        Some(field) if !message.is_empty() => format!("{}: {}", humanize_field(field), message),
        _ => message,
    };

    match errors.len() {
        1 => Some(line),
        n => Some(format!("{} (and {} more)", line, n - 1)),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
