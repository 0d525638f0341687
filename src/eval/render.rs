//! Turns an [`EvalResult`] into a [`Reply`].

use crate::interaction::{Reply, Requester, Tone};

use super::backend::{EvalResult, SnippetStatus};

/// Longest stdout excerpt shown, in characters.
pub const MAX_STDOUT_CHARS: usize = 1000;

const TRUNCATED_MARKER: &str = "(output truncated)";

pub fn author_line(requester: &Requester) -> Option<String> {
    requester.user_id().map(|user| format!("{user}'s result"))
}

/// Render `result`. `code` is echoed above the result when given.
pub fn render(requester: &Requester, code: Option<&str>, result: &EvalResult) -> Reply {
    let mut text = String::new();

    if let Some(code) = code {
        text.push_str("**Code**\n```java\n");
        text.push_str(code.trim_end());
        text.push_str("\n```\n");
    }

    text.push_str("**Result**\n");
    text.push_str(&describe(result));

    if !result.stdout.is_empty() || result.stdout_overflow {
        let (excerpt, cut) = truncate_chars(&result.stdout, MAX_STDOUT_CHARS);
        text.push_str("\n**Output**\n```\n");
        text.push_str(excerpt);
        text.push_str("\n```");
        if cut || result.stdout_overflow {
            text.push('\n');
            text.push_str(TRUNCATED_MARKER);
        }
    }

    Reply {
        author: author_line(requester),
        text,
        tone: tone(result),
        ..Reply::default()
    }
}

fn tone(result: &EvalResult) -> Tone {
    if result.exception.is_some() {
        return Tone::Error;
    }
    match result.status {
        SnippetStatus::Valid => Tone::Success,
        SnippetStatus::RecoverableDefined | SnippetStatus::RecoverableNotDefined => Tone::Neutral,
        SnippetStatus::Rejected | SnippetStatus::Aborted => Tone::Error,
    }
}

fn describe(result: &EvalResult) -> String {
    if let Some(exception) = &result.exception {
        return if exception.exception_message.is_empty() {
            format!("Uncaught exception: `{}`", exception.exception_class)
        } else {
            format!(
                "Uncaught exception: `{}`: {}",
                exception.exception_class, exception.exception_message
            )
        };
    }

    match result.status {
        SnippetStatus::Valid => match result.result.as_deref() {
            Some(value) if !value.is_empty() => format!("`{value}`"),
            _ => "Ran successfully, no value.".to_string(),
        },
        SnippetStatus::RecoverableDefined => with_errors(
            "Defined, but it refers to something that does not exist yet.",
            &result.errors,
        ),
        SnippetStatus::RecoverableNotDefined => with_errors(
            "Not defined, it refers to something that does not exist yet.",
            &result.errors,
        ),
        SnippetStatus::Rejected => with_errors("Rejected by the compiler.", &result.errors),
        SnippetStatus::Aborted => "Evaluation was aborted.".to_string(),
    }
}

fn with_errors(headline: &str, errors: &[String]) -> String {
    if errors.is_empty() {
        return headline.to_string();
    }
    let mut out = String::from(headline);
    for err in errors {
        out.push_str("\n- ");
        out.push_str(err);
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
